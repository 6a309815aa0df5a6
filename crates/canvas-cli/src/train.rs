use canvas_core::{models::Accuracy, training::Trainer};
use canvas_storage::key_provider::KeyProvider;
use canvas_train::{MagnitudeBaselineTrainer, TrainingPipeline};
use color_eyre::Result;
use tracing::{debug, warn};

use crate::storage::Services;

/// Train the magnitude baseline on the whole log and save it as the next version.
pub async fn run<P: KeyProvider>(services: &Services<P>) -> Result<()> {
    run_with(services, &MagnitudeBaselineTrainer).await
}

async fn run_with<P: KeyProvider>(services: &Services<P>, trainer: &dyn Trainer) -> Result<()> {
    let pipeline = TrainingPipeline::new(services.sensors().await?, services.models().await?)
        .with_min_data_points(services.min_training_points);

    let mut progress = pipeline.progress();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let fraction = *progress.borrow_and_update();
            debug!(percent = (fraction * 100.0).round(), "training progress");
        }
    });

    let outcome = pipeline.train(trainer).await;
    drop(pipeline);
    if let Err(err) = watcher.await {
        warn!(error = %err, "progress reporter stopped abnormally");
    }

    let saved = outcome?;
    let accuracy = saved
        .accuracy
        .map(|a| format!("{:.1}%", a.value() * 100.0))
        .unwrap_or_else(|| "n/a".into());
    println!(
        "Trained model v{} with {} on {} readings (accuracy {accuracy})",
        saved.version,
        trainer.name(),
        saved.data_point_count
    );
    debug!(accuracy = ?saved.accuracy.map(Accuracy::value), "training finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use canvas_core::{
        models::ModelRegistry,
        sensors::{MotionVector, SensorLog, SensorReading},
    };
    use canvas_train::TrainingError;

    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn refuses_with_too_few_readings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path());
        let log = services.sensors().await.expect("log");
        log.append(SensorReading::now().with_accelerometer(MotionVector::new(0.0, 0.0, 9.8)))
            .await
            .expect("append");

        let err = run(&services).await.expect_err("not enough data");
        assert!(matches!(
            err.downcast_ref::<TrainingError>(),
            Some(TrainingError::InsufficientData { have: 1, .. })
        ));
        let registry = services.models().await.expect("registry");
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn trains_once_enough_readings_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut services = storage::test_services(dir.path());
        services.min_training_points = 5;
        let readings = (0..5)
            .map(|i| {
                let z = 9.6 + i as f64 * 0.1;
                SensorReading::now().with_accelerometer(MotionVector::new(0.0, 0.0, z))
            })
            .collect();
        let log = services.sensors().await.expect("log");
        log.append_all(readings).await.expect("append");

        run(&services).await.expect("train");

        let registry = services.models().await.expect("registry");
        let current = registry.current().await.expect("model saved");
        assert_eq!(current.version, 1);
        assert_eq!(current.data_point_count, 5);
        assert!(registry.load_latest().await.expect("load").is_some());
    }
}
