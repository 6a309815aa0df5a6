mod cli;
mod config;
mod models;
mod sensors;
mod storage;
mod train;

use crate::cli::ConfigCommand;
use canvas_core::{models::ModelRegistry, sensors::SensorLog};
use canvas_storage::{envelope::EnvelopeCodec, key_provider::KeyProvider};
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Health => {
            run_health_check(&storage::services_from_config(&config)?).await?;
        }
        cli::Command::Sensors(cmd) => {
            sensors::handle(cmd, &storage::services_from_config(&config)?).await?;
        }
        cli::Command::Models(cmd) => {
            models::handle(cmd, &storage::services_from_config(&config)?).await?;
        }
        cli::Command::Train => train::run(&storage::services_from_config(&config)?).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so command output stays pipeable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Checks the key and the codec, then each store on its own.
async fn run_health_check<P: KeyProvider>(services: &storage::Services<P>) -> Result<()> {
    run_codec_health(&services.codec).await?;
    println!("Encryption: ok");

    let mut failed = 0;
    match sensor_log_health(services).await {
        Ok(readings) => println!("Sensor log: ok ({readings} readings)"),
        Err(err) => {
            failed += 1;
            println!("Sensor log: FAILED ({err})");
        }
    }
    match registry_health(services).await {
        Ok((models, next)) => println!("Models: ok ({models} stored, next v{next})"),
        Err(err) => {
            failed += 1;
            println!("Models: FAILED ({err})");
        }
    }

    if failed > 0 {
        color_eyre::eyre::bail!("{failed} store(s) unhealthy");
    }
    Ok(())
}

async fn sensor_log_health<P: KeyProvider>(services: &storage::Services<P>) -> Result<usize> {
    Ok(services.sensors().await?.count().await?)
}

async fn registry_health<P: KeyProvider>(services: &storage::Services<P>) -> Result<(usize, u32)> {
    let registry = services.models().await?;
    Ok((registry.list().await.len(), registry.next_version().await))
}

async fn run_codec_health<P: KeyProvider>(codec: &EnvelopeCodec<P>) -> Result<()> {
    let payload = b"health/check";
    let sealed = codec.encrypt(payload).await?;
    let round_trip = codec.decrypt(&sealed).await?;
    if round_trip != payload {
        color_eyre::eyre::bail!("encryption round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let resolved = config.resolved(storage::default_data_dir()?);
    let path = config::write_default_if_missing(&resolved)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn health_check_with_test_services_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path());
        run_health_check(&services)
            .await
            .expect("health check should succeed");
    }

    #[tokio::test]
    async fn health_check_reports_corrupted_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path());
        let log = services.sensors().await.expect("log");
        std::fs::create_dir_all(log.path().parent().expect("parent")).expect("mkdir");
        std::fs::write(log.path(), b"short").expect("write");

        assert!(run_health_check(&services).await.is_err());
        assert!(registry_health(&services).await.is_ok());
    }

    #[tokio::test]
    async fn health_check_checks_stores_independently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let models_dir = dir.path().join(storage::MODELS_DIR);
        std::fs::create_dir_all(&models_dir).expect("mkdir");
        std::fs::write(models_dir.join(canvas_registry::INDEX_FILE_NAME), b"{ bad")
            .expect("corrupt index");
        let services = storage::test_services(dir.path());

        assert!(run_health_check(&services).await.is_err());
        assert_eq!(sensor_log_health(&services).await.expect("log healthy"), 0);
    }
}
