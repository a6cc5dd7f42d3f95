#![deny(missing_docs)]

//! Core library for the docrag document, collection and evaluation service.

/// HTTP routing and REST handlers.
pub mod api;
/// Completion callbacks for background jobs.
pub mod callback;
/// Vector store collections backed by an LLM provider.
pub mod collections;
/// Environment-driven configuration management.
pub mod config;
/// Document uploads, storage and transformation jobs.
pub mod documents;
/// Evaluation runs and trace scores.
pub mod evaluations;
/// Structured logging and tracing setup.
pub mod logging;
/// Service activity counters.
pub mod metrics;
/// Shared JSON response envelope.
pub mod response;
/// In-memory record stores.
pub mod store;
/// Document format transformers.
pub mod transform;
