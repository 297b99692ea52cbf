//! # Crate-wide error types
//!
//! Every component returns a narrow, component-scoped error where that's
//! useful (`store::StoreError`, `llm::LlmError`, ...) and those convert into
//! [`TeambotError`] at the points where the orchestrator needs to reason about
//! *kind* rather than detail — matching the propagation policy in the core
//! design: configuration errors abort startup, everything else is logged and
//! counted without taking the process down.

use thiserror::Error;

/// Top-level error kind, mirroring the error-handling design's taxonomy.
#[derive(Debug, Error)]
pub enum TeambotError {
    /// Invalid or missing configuration. Startup-only; aborts the process.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport-layer failure. `recoverable` distinguishes "reconnect" from
    /// "give up after max attempts".
    #[error("transport error (recoverable={recoverable}): {message}")]
    Transport { recoverable: bool, message: String },

    /// An inbound envelope could not be decoded.
    #[error("envelope decode error: {0}")]
    EnvelopeDecode(String),

    /// Embedding failed; callers should fall through to the local embedder
    /// rather than abort the ingest path.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector store / index failure. Logged and counted, never aborts.
    #[error("store error: {0}")]
    Store(String),

    /// LLM gateway failure after retries were exhausted.
    #[error("llm error: {0}")]
    Llm(String),

    /// Outbound chat send failure. Not retried at the transport layer.
    #[error("send error: {0}")]
    Send(String),
}

pub type Result<T> = std::result::Result<T, TeambotError>;
