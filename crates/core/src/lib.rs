//! # LedgerGuard Core
//!
//! Domain types and error definitions for the LedgerGuard security core.
//! This crate has **no framework dependencies** beyond serde and a tokio
//! broadcast channel. It defines the vocabulary every other crate speaks:
//! security events, their severities and sources, and the error taxonomy
//! of the token, cipher and configuration paths.

pub mod error;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{CipherError, Error, Result, TokenError};
pub use event::{EventBus, EventSource, SecurityEvent, SecurityEventType, Severity};
