//! Encryption at rest for Canvas stores.
//! AES-256-GCM envelopes keyed from the OS keyring (or test doubles), plus the
//! crash-safe file primitives the stores commit through.

pub mod atomic;
pub mod envelope;
pub mod key_provider;
