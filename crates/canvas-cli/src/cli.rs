use std::path::PathBuf;

use canvas_core::sensors::{Location, MotionVector};
use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "canvas",
    about = "Encrypted on-device store for sensor readings and trained models",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Round-trip a sample payload through the encryption path.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Inspect and extend the sensor log.
    #[command(subcommand)]
    Sensors(SensorsCommand),
    /// Manage trained model versions.
    #[command(subcommand)]
    Models(ModelsCommand),
    /// Train a baseline model on the collected readings.
    Train,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SensorsCommand {
    /// Append one reading stamped with the current time.
    Record {
        /// Accelerometer sample as `x,y,z` (m/s²).
        #[arg(long, value_parser = parse_motion, allow_hyphen_values = true)]
        accel: Option<MotionVector>,
        /// Gyroscope sample as `x,y,z` (rad/s).
        #[arg(long, value_parser = parse_motion, allow_hyphen_values = true)]
        gyro: Option<MotionVector>,
        /// Location as `lat,lon,altitude,accuracy`.
        #[arg(long, value_parser = parse_location, allow_hyphen_values = true)]
        location: Option<Location>,
    },
    /// Append readings from a JSON array file.
    Import { path: PathBuf },
    /// Print stored readings.
    List {
        /// Only the most recent N readings.
        #[arg(long)]
        recent: Option<usize>,
    },
    /// Print count and time span of the log.
    Stats,
    /// Delete every stored reading.
    Clear,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ModelsCommand {
    /// List model versions, newest first.
    List,
    /// Print the version the next saved model will get.
    NextVersion,
    /// Store an artifact file as the next model version.
    Import {
        path: PathBuf,
        #[arg(long)]
        accuracy: Option<f64>,
        #[arg(long, default_value_t = 0)]
        data_points: u64,
        #[arg(long, default_value_t = 0.0)]
        duration_secs: f64,
    },
    /// Decrypt a model artifact to a file (latest when no version is given).
    #[command(disable_version_flag = true)]
    Export {
        out: PathBuf,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Delete a model version.
    #[command(disable_version_flag = true)]
    Delete { version: u32 },
}

fn parse_floats<const N: usize>(raw: &str) -> Result<[f64; N], String> {
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    values
        .try_into()
        .map_err(|v: Vec<f64>| format!("expected {N} comma-separated numbers, got {}", v.len()))
}

fn parse_motion(raw: &str) -> Result<MotionVector, String> {
    let [x, y, z] = parse_floats::<3>(raw)?;
    Ok(MotionVector::new(x, y, z))
}

fn parse_location(raw: &str) -> Result<Location, String> {
    let [latitude, longitude, altitude, accuracy] = parse_floats::<4>(raw)?;
    Ok(Location {
        latitude,
        longitude,
        altitude,
        accuracy,
    })
}
