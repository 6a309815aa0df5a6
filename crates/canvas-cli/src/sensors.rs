use std::{fs, path::Path};

use canvas_core::sensors::{SensorLog, SensorReading};
use canvas_storage::key_provider::KeyProvider;
use color_eyre::{eyre::WrapErr, Result};

use crate::{cli::SensorsCommand, storage::Services};

/// Execute a sensors subcommand against the encrypted log.
pub async fn handle<P: KeyProvider>(cmd: SensorsCommand, services: &Services<P>) -> Result<()> {
    let log = services.sensors().await?;
    match cmd {
        SensorsCommand::Record {
            accel,
            gyro,
            location,
        } => {
            let mut reading = SensorReading::now();
            reading.accelerometer = accel;
            reading.gyroscope = gyro;
            reading.location = location;
            let id = reading.id;
            let count = log.append(reading).await?;
            println!("Recorded {id} ({count} readings stored)");
        }
        SensorsCommand::Import { path } => {
            let imported = import_file(&path, log.as_ref()).await?;
            println!("Imported {imported} readings from {}", path.display());
        }
        SensorsCommand::List { recent } => {
            let readings = match recent {
                Some(n) => log.load_recent(n).await?,
                None => log.load_all().await?,
            };
            if readings.is_empty() {
                println!("No readings yet. Add one with `canvas sensors record`.");
                return Ok(());
            }
            for reading in readings {
                println!("{}", describe(&reading));
            }
        }
        SensorsCommand::Stats => {
            let stats = log.statistics().await?;
            println!("Readings: {}", stats.total_count);
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                println!("Oldest:   {}", oldest.to_rfc3339());
                println!("Newest:   {}", newest.to_rfc3339());
            }
            println!("Min for training: {}", services.min_training_points);
        }
        SensorsCommand::Clear => {
            log.clear_all().await?;
            println!("Sensor log cleared");
        }
    }

    Ok(())
}

/// Append every reading from a JSON array, in file order, as one batch.
async fn import_file<L: SensorLog>(path: &Path, log: &L) -> Result<usize> {
    let raw = fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let readings: Vec<SensorReading> =
        serde_json::from_slice(&raw).wrap_err("expected a JSON array of sensor readings")?;
    let imported = readings.len();
    if imported > 0 {
        log.append_all(readings).await?;
    }
    Ok(imported)
}

fn describe(reading: &SensorReading) -> String {
    let mut line = format!("{} {}", reading.timestamp.to_rfc3339(), reading.id);
    if let Some(a) = reading.accelerometer {
        line.push_str(&format!(" accel=({:.3},{:.3},{:.3})", a.x, a.y, a.z));
    }
    if let Some(g) = reading.gyroscope {
        line.push_str(&format!(" gyro=({:.3},{:.3},{:.3})", g.x, g.y, g.z));
    }
    if let Some(l) = reading.location {
        line.push_str(&format!(
            " loc=({:.5},{:.5}) ±{:.0}m",
            l.latitude, l.longitude, l.accuracy
        ));
    }
    line
}

#[cfg(test)]
mod tests {
    use canvas_core::sensors::MotionVector;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn record_appends_a_reading() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path());

        handle(
            SensorsCommand::Record {
                accel: Some(MotionVector::new(0.0, 0.0, 9.8)),
                gyro: None,
                location: None,
            },
            &services,
        )
        .await
        .expect("record");

        let log = services.sensors().await.expect("log");
        let all = log.load_all().await.expect("load");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].accelerometer, Some(MotionVector::new(0.0, 0.0, 9.8)));
        assert!(all[0].location.is_none());
    }

    #[tokio::test]
    async fn import_keeps_file_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path().join("data"));
        let readings: Vec<_> = (0..3)
            .map(|i| SensorReading::new(Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap()))
            .collect();
        let file = dir.path().join("readings.json");
        fs::write(&file, serde_json::to_vec(&readings).expect("json")).expect("write");

        handle(SensorsCommand::Import { path: file }, &services)
            .await
            .expect("import");

        let log = services.sensors().await.expect("log");
        let stored = log.load_all().await.expect("load");
        let ids: Vec<_> = stored.iter().map(|r| r.id).collect();
        assert_eq!(ids, readings.iter().map(|r| r.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn import_with_one_bad_reading_stores_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path().join("data"));
        let file = dir.path().join("bad.json");
        fs::write(
            &file,
            br#"[{"id":"8f1c2a4e-1d4b-4c37-9a52-6f7e1b0c3d21","timestamp":"2024-01-01T00:00:00Z"},{"id":"nope"}]"#,
        )
        .expect("write");

        let result = handle(SensorsCommand::Import { path: file }, &services).await;
        assert!(result.is_err());
        let log = services.sensors().await.expect("log");
        assert_eq!(log.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn clear_empties_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = storage::test_services(dir.path());
        services
            .sensors()
            .await
            .expect("log")
            .append(SensorReading::now())
            .await
            .expect("append");

        handle(SensorsCommand::Clear, &services)
            .await
            .expect("clear");
        handle(SensorsCommand::Stats, &services)
            .await
            .expect("stats");
        let log = services.sensors().await.expect("log");
        assert_eq!(log.count().await.expect("count"), 0);
    }

    #[test]
    fn describe_includes_present_sensors_only() {
        let reading = SensorReading::new(Utc.timestamp_opt(0, 0).unwrap())
            .with_gyroscope(MotionVector::new(1.0, 2.0, 3.0));
        let line = describe(&reading);
        assert!(line.contains("gyro=(1.000,2.000,3.000)"));
        assert!(!line.contains("accel="));
        assert!(!line.contains("loc="));
    }
}
