//! HTTP endpoint handlers. These are thin wrappers that forward to the pipeline.
//! Each handler is instrumented and logs basic request and result info.

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use tracing::{info, instrument};

use crate::domain::GenerationSpec;
use crate::error::PipelineError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let backend = state.generator.as_ref().map(|g| g.backend_name().to_string());
  Json(HealthOut { ok: true, backend })
}

#[instrument(level = "info", skip(state, body), fields(item_type = %body.item_type, requested = body.requested_count))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerationSpec>,
) -> Response {
  let Some(generator) = &state.generator else {
    let out = ErrorOut { error: "generation backend not configured".into(), details: None };
    return (StatusCode::SERVICE_UNAVAILABLE, Json(out)).into_response();
  };

  match generator.generate(&body).await {
    Ok(result) => {
      info!(target: "itemforge", generated = result.generated, requested = result.requested, "HTTP generate served");
      Json(result).into_response()
    }
    Err(e) => {
      let status = match &e {
        PipelineError::InvalidSpec(_) => StatusCode::BAD_REQUEST,
        PipelineError::HardFailure { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
      };
      info!(target: "itemforge", %status, error = %e, "HTTP generate failed");
      (status, Json(ErrorOut::from(&e))).into_response()
    }
  }
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use axum::body::{to_bytes, Body};
  use axum::http::Request;
  use tower::ServiceExt;

  use super::*;
  use crate::completion::{CompletionClient, Instructions};
  use crate::config::{PipelineSettings, Prompts};
  use crate::error::CompletionError;
  use crate::pipeline::Generator;
  use crate::routes::build_router;
  use crate::stems::StemBank;

  struct Fixed(&'static str);

  #[async_trait]
  impl CompletionClient for Fixed {
    async fn complete(&self, _instructions: &Instructions) -> Result<String, CompletionError> {
      Ok(self.0.to_string())
    }
    fn name(&self) -> &str { "fixed" }
  }

  fn app(reply: &'static str) -> axum::Router {
    let generator = Generator::new(Arc::new(Fixed(reply)), Arc::new(StemBank::default()), Prompts::default(), PipelineSettings::default());
    build_router(Arc::new(AppState::with_generator(generator)))
  }

  async fn post(app: axum::Router, body: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::post("/api/v1/generate")
      .header("content-type", "application/json")
      .body(Body::from(body.to_string()))
      .expect("request");
    let res = app.oneshot(req).await.expect("response");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
  }

  #[tokio::test]
  async fn generate_returns_items_and_context() {
    let reply = r#"[{"stem": "What does EXPLAIN show?", "itemType": "open_ended"}]"#;
    let (status, body) = post(app(reply), r#"{"fields":["Backend"],"level":"Junior","itemType":"open_ended","requestedCount":1}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generated"], 1);
    assert_eq!(body["requested"], 1);
    assert_eq!(body["outcome"], "success");
    assert_eq!(body["context"]["level"], "junior");
    assert_eq!(body["context"]["itemType"], "open_ended");
    assert_eq!(body["items"][0]["itemType"], "open_ended");
    assert!(body["items"][0].get("options").is_none());
  }

  #[tokio::test]
  async fn invalid_request_is_a_bad_request() {
    let (status, body) = post(app("[]"), r#"{"fields":["Backend"],"itemType":"multiple_choice","requestedCount":25}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("25"));
    assert!(body.get("details").is_none());
  }

  #[tokio::test]
  async fn zero_items_is_a_bad_gateway() {
    let (status, body) = post(app("no items here"), r#"{"field":"Backend","itemType":"coding","requestedCount":1}"#).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["details"].is_string());
  }
}
