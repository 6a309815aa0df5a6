//! Core abstractions for Canvas: sensor readings, model metadata, and the
//! encrypted persistence contracts implemented by the storage crates.
//! This crate does no I/O of its own.

pub mod models;
pub mod sensors;
pub mod storage;
pub mod training;
