use std::{fs, path::Path, time::Duration};

use canvas_core::models::{Accuracy, ModelMetadata, ModelRegistry};
use canvas_storage::key_provider::KeyProvider;
use chrono::Utc;
use color_eyre::{
    eyre::{bail, eyre, WrapErr},
    Result,
};

use crate::{cli::ModelsCommand, storage::Services};

/// Execute a models subcommand against the encrypted registry.
pub async fn handle<P: KeyProvider>(cmd: ModelsCommand, services: &Services<P>) -> Result<()> {
    let registry = services.models().await?;
    match cmd {
        ModelsCommand::List => {
            let models = registry.list().await;
            if models.is_empty() {
                println!("No models yet. Train one with `canvas train`.");
                return Ok(());
            }
            for model in models {
                println!("{}", describe(&model));
            }
        }
        ModelsCommand::NextVersion => println!("{}", registry.next_version().await),
        ModelsCommand::Import {
            path,
            accuracy,
            data_points,
            duration_secs,
        } => {
            let saved = import_artifact(
                registry.as_ref(),
                &path,
                accuracy,
                data_points,
                duration_secs,
            )
            .await?;
            println!("Stored {} as {}", path.display(), describe(&saved));
        }
        ModelsCommand::Export { out, version } => {
            let (label, bytes) = match version {
                Some(version) => (format!("v{version}"), registry.load_model(version).await?),
                None => ("latest".to_string(), registry.load_latest().await?),
            };
            let bytes = bytes.ok_or_else(|| eyre!("no model artifact for {label}"))?;
            fs::write(&out, &bytes).wrap_err_with(|| format!("writing {}", out.display()))?;
            println!("Exported {label} ({} bytes) to {}", bytes.len(), out.display());
        }
        ModelsCommand::Delete { version } => {
            registry.delete_model(version).await?;
            println!("Deleted model v{version}");
        }
    }

    Ok(())
}

async fn import_artifact<R: ModelRegistry>(
    registry: &R,
    path: &Path,
    accuracy: Option<f64>,
    data_points: u64,
    duration_secs: f64,
) -> Result<ModelMetadata> {
    let accuracy = match accuracy {
        Some(raw) => Some(Accuracy::new(raw).ok_or_else(|| eyre!("accuracy must be in [0, 1]"))?),
        None => None,
    };
    let duration = Duration::try_from_secs_f64(duration_secs)
        .map_err(|e| eyre!("invalid --duration-secs: {e}"))?;
    let bytes = fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }

    let metadata = ModelMetadata::new(
        registry.next_version().await,
        Utc::now(),
        data_points,
        accuracy,
        duration,
    );
    Ok(registry.save_model(&bytes, metadata).await?)
}

fn describe(model: &ModelMetadata) -> String {
    let accuracy = model
        .accuracy
        .map(|a| format!("{:.1}%", a.value() * 100.0))
        .unwrap_or_else(|| "n/a".into());
    format!(
        "v{} trained {} on {} points, accuracy {}, took {:.1}s",
        model.version,
        model.trained_on.to_rfc3339(),
        model.data_point_count,
        accuracy,
        model.training_duration.as_secs_f64()
    )
}
