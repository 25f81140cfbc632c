//! Minimal OpenAI client implementing the `CompletionClient` contract.
//!
//! We only call chat.completions. Batch prompts get plain text back; single-item prompts
//! request a strict JSON object. Calls are instrumented and log model names, latencies,
//! and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{instrument, info, warn};

use crate::completion::{CompletionClient, Instructions, ResponseShape};
use crate::error::CompletionError;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(temperature: f32, request_timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(request_timeout)
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model, temperature })
  }
}

#[async_trait]
impl CompletionClient for OpenAI {
  #[instrument(level = "info", skip(self, instructions), fields(model = %self.model, shape = ?instructions.shape, user_len = instructions.user.len()))]
  async fn complete(&self, instructions: &Instructions) -> Result<String, CompletionError> {
    let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
    let response_format = match instructions.shape {
      ResponseShape::Object => Some(ResponseFormat { r#type: "json_object".into() }),
      // json_object mode forbids a top-level array
      ResponseShape::Array => None,
    };
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: instructions.system.clone() },
        ChatMessageReq { role: "user".into(), content: instructions.user.clone() },
      ],
      temperature: self.temperature,
      response_format,
      max_tokens: None,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "itemforge/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(map_transport_error)?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      warn!(%status, elapsed = ?start.elapsed(), "OpenAI call rejected");
      return Err(map_status(status, msg));
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let choice = body
      .choices
      .into_iter()
      .next()
      .ok_or_else(|| CompletionError::MalformedResponse("no choices in response".into()))?;
    let text = choice.message.content.unwrap_or_default();

    info!(
      elapsed = ?start.elapsed(),
      response_len = text.len(),
      finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
      "Model response received"
    );
    Ok(text)
  }

  fn name(&self) -> &str {
    "openai"
  }
}

fn map_status(status: StatusCode, msg: String) -> CompletionError {
  match status.as_u16() {
    401 | 403 => CompletionError::MalformedCredentials(msg),
    429 => CompletionError::RateLimited(msg),
    _ => CompletionError::Unavailable(format!("OpenAI HTTP {}: {}", status, msg)),
  }
}

fn map_transport_error(e: reqwest::Error) -> CompletionError {
  if e.is_timeout() {
    CompletionError::Unavailable(format!("request timeout: {}", e))
  } else if e.is_connect() {
    CompletionError::Unavailable(format!("connection error: {}", e))
  } else {
    CompletionError::Unavailable(e.to_string())
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
  #[serde(default)] finish_reason: Option<String>,
}
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_map_to_failure_kinds() {
    assert!(matches!(map_status(StatusCode::UNAUTHORIZED, "bad key".into()), CompletionError::MalformedCredentials(_)));
    assert!(matches!(map_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into()), CompletionError::RateLimited(_)));
    assert!(matches!(map_status(StatusCode::BAD_GATEWAY, "oops".into()), CompletionError::Unavailable(_)));
  }

  #[test]
  fn error_body_message_is_extracted() {
    let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("Incorrect API key provided"));
    assert_eq!(extract_openai_error("not json"), None);
  }

  #[test]
  fn object_shape_requests_json_mode() {
    let req = ChatCompletionRequest {
      model: "m".into(),
      messages: vec![],
      temperature: 0.5,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };
    let v = serde_json::to_value(&req).expect("serialize");
    assert_eq!(v["response_format"]["type"], "json_object");
    assert!(v.get("max_tokens").is_none());
  }
}
