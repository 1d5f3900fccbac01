//! Error type definitions for the retrovue runtime.
//!
//! Mirrors the layered shape of a typical service error hierarchy: a
//! top-level [`RuntimeError`] that downstream callers match on, with
//! per-subsystem enums underneath so a scheduling violation, a producer
//! failure and a router hiccup don't all collapse into one undifferentiated
//! string.

use thiserror::Error;

pub mod types;
pub use types::*;

/// Top-level runtime error.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RuntimeError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
