//! Concrete storage with encryption at rest.
//! AES-256-GCM envelopes keyed by a 256-bit key persisted in the user's data
//! directory (or a test double), plus overwrite-before-unlink deletion.

pub mod cipher;
pub mod key_provider;
pub mod secure_file_store;
pub mod shred;
