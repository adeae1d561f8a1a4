//! Secret handling utilities.
//!
//! Re-exports secrecy types so callers holding the database URL do not need
//! a direct secrecy dependency.

pub use secrecy::{ExposeSecret, SecretString};
