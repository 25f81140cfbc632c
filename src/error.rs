//! Error taxonomy for the generation pipeline.
//!
//! Only `PipelineError` reaches callers. Everything else is absorbed per item or per
//! attempt and logged.

use thiserror::Error;

/// The caller's request is malformed. Raised before any model call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecValidationError {
  #[error("at least one field is required")]
  EmptyFields,

  #[error("unknown item type: {0:?}")]
  UnknownItemType(String),

  #[error("requested count {0} is outside 1..=20")]
  CountOutOfRange(i64),
}

/// Failure of a single completion call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
  #[error("generation backend unavailable: {0}")]
  Unavailable(String),

  #[error("generation backend rejected credentials: {0}")]
  MalformedCredentials(String),

  #[error("generation backend rate limit exceeded: {0}")]
  RateLimited(String),

  #[error("generation call timed out after {0:?}")]
  Timeout(std::time::Duration),

  #[error("generation backend returned an unreadable response: {0}")]
  MalformedResponse(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepairError {
  #[error("model output contains no item-opening marker")]
  NoItemMarker,
}

#[derive(Debug, Error)]
pub enum StemSourceError {
  #[error("existing item sample unavailable: {0}")]
  Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("invalid generation request: {0}")]
  InvalidSpec(#[from] SpecValidationError),

  #[error("no items could be generated")]
  HardFailure { detail: String },

  #[error("generation cancelled before completion")]
  Cancelled { detail: String },
}

impl PipelineError {
  /// Diagnostic detail for the failure response, when there is one.
  pub fn details(&self) -> Option<String> {
    match self {
      PipelineError::InvalidSpec(_) => None,
      PipelineError::HardFailure { detail } | PipelineError::Cancelled { detail } => {
        Some(detail.clone())
      }
    }
  }
}
