//! Public protocol structs for the HTTP endpoints (serde ready).
//! The request body is `GenerationSpec` itself; the success body is `GenerationResult`.

use serde::Serialize;

use crate::error::PipelineError;

/// Failure body: `{ "error": ..., "details"?: ... }`.
#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&PipelineError> for ErrorOut {
    fn from(e: &PipelineError) -> Self {
        Self { error: e.to_string(), details: e.details() }
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub backend: Option<String>,
}
