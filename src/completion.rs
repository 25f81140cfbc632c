//! Generation Client contract consumed by the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::CompletionError;

/// Top-level JSON shape the instructions ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
  Array,
  Object,
}

/// Composed instruction text for one completion call.
#[derive(Clone, Debug)]
pub struct Instructions {
  pub system: String,
  pub user: String,
  pub shape: ResponseShape,
}

/// Text-completion backend. Implementations do not retry.
#[async_trait]
pub trait CompletionClient: Send + Sync {
  async fn complete(&self, instructions: &Instructions) -> Result<String, CompletionError>;

  /// Backend label for logs.
  fn name(&self) -> &str;
}

/// One call bounded by `limit`. Elapsed time maps to `CompletionError::Timeout`.
pub async fn complete_within(
  client: &dyn CompletionClient,
  instructions: &Instructions,
  limit: Duration,
) -> Result<String, CompletionError> {
  match tokio::time::timeout(limit, client.complete(instructions)).await {
    Ok(res) => res,
    Err(_) => Err(CompletionError::Timeout(limit)),
  }
}

/// Limit for the next call: `call_timeout`, shortened to the time left before `deadline`.
/// `None` once the deadline has passed.
pub fn call_limit(call_timeout: Duration, deadline: Option<Instant>) -> Option<Duration> {
  match deadline {
    None => Some(call_timeout),
    Some(deadline) => {
      let left = deadline.checked_duration_since(Instant::now())?;
      if left.is_zero() { None } else { Some(left.min(call_timeout)) }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Sleepy;

  #[async_trait]
  impl CompletionClient for Sleepy {
    async fn complete(&self, _instructions: &Instructions) -> Result<String, CompletionError> {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok("[]".into())
    }
    fn name(&self) -> &str { "sleepy" }
  }

  #[tokio::test]
  async fn slow_call_becomes_timeout() {
    let ins = Instructions { system: String::new(), user: String::new(), shape: ResponseShape::Array };
    let limit = Duration::from_millis(20);
    let res = complete_within(&Sleepy, &ins, limit).await;
    assert_eq!(res, Err(CompletionError::Timeout(limit)));
  }

  #[test]
  fn call_limit_tracks_deadline() {
    let timeout = Duration::from_secs(60);
    assert_eq!(call_limit(timeout, None), Some(timeout));
    let soon = Instant::now() + Duration::from_secs(5);
    assert!(call_limit(timeout, Some(soon)).is_some_and(|d| d <= Duration::from_secs(5)));
    assert_eq!(call_limit(timeout, Some(Instant::now() - Duration::from_millis(1))), None);
  }
}
