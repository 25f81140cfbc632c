//! Backfill Generator: makes up a shortfall with sequential singleton generations.
//!
//! One attempt per missing slot, no retries within an attempt. A failure at any stage of
//! an attempt forfeits that slot only.

use std::time::Duration;

use tokio::time::Instant;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::completion::{call_limit, complete_within, CompletionClient};
use crate::domain::{EffectiveSpec, ValidatedItem};
use crate::error::CompletionError;
use crate::normalize::normalize;
use crate::prompt::PromptComposer;
use crate::repair::parse_strict;
use crate::util::trunc_for_log;
use crate::validate::{Rejection, Validator};

#[derive(Debug, Error)]
pub enum AttemptError {
  #[error(transparent)]
  Upstream(#[from] CompletionError),

  #[error("singleton response did not parse as an item object: {0}")]
  Malformed(String),

  #[error("singleton item rejected: {0}")]
  Rejected(#[from] Rejection),
}

#[derive(Debug, Default)]
pub struct BackfillOutcome {
  /// Accepted items in attempt order.
  pub items: Vec<ValidatedItem>,
  pub attempts: usize,
  pub last_error: Option<String>,
  /// The overall deadline passed before the attempt budget was spent.
  pub cut_short: bool,
}

pub struct Backfill<'a> {
  client: &'a dyn CompletionClient,
  composer: &'a PromptComposer<'a>,
  call_timeout: Duration,
  deadline: Option<Instant>,
}

impl<'a> Backfill<'a> {
  pub fn new(
    client: &'a dyn CompletionClient,
    composer: &'a PromptComposer<'a>,
    call_timeout: Duration,
    deadline: Option<Instant>,
  ) -> Self {
    Self { client, composer, call_timeout, deadline }
  }

  /// Spend at most `shortfall` attempts. `avoid` seeds the dedup list; accepted stems are
  /// appended as the run progresses.
  #[instrument(level = "info", skip(self, spec, validator, avoid), fields(backend = self.client.name()))]
  pub async fn run(
    &self,
    spec: &EffectiveSpec,
    validator: &mut Validator<'_>,
    mut avoid: Vec<String>,
    shortfall: usize,
  ) -> BackfillOutcome {
    let mut outcome = BackfillOutcome::default();
    let mut need = shortfall;

    while need > 0 && outcome.attempts < shortfall {
      let Some(limit) = call_limit(self.call_timeout, self.deadline) else {
        warn!(target: "pipeline", attempts = outcome.attempts, need, "Deadline passed; stopping backfill");
        outcome.cut_short = true;
        break;
      };
      outcome.attempts += 1;
      let slot = outcome.attempts;

      match self.attempt(spec, validator, &avoid, limit).await {
        Ok(item) => {
          debug!(target: "pipeline", slot, stem = %trunc_for_log(&item.stem, 80), "Backfill slot filled");
          avoid.push(item.stem.clone());
          outcome.items.push(item);
          need -= 1;
        }
        Err(e) => {
          warn!(target: "pipeline", slot, error = %e, "Backfill slot forfeited");
          outcome.last_error = Some(e.to_string());
        }
      }
    }

    info!(target: "pipeline", attempts = outcome.attempts, filled = outcome.items.len(), shortfall, "Backfill finished");
    outcome
  }

  async fn attempt(
    &self,
    spec: &EffectiveSpec,
    validator: &mut Validator<'_>,
    avoid: &[String],
    limit: Duration,
  ) -> Result<ValidatedItem, AttemptError> {
    let instructions = self.composer.single(spec, avoid);
    let raw = complete_within(self.client, &instructions, limit).await?;
    let text = normalize(&raw);
    let candidate = parse_strict(&text)
      .into_iter()
      .next()
      .ok_or_else(|| AttemptError::Malformed(trunc_for_log(&text, 120)))?;
    Ok(validator.validate(&candidate)?)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;
  use std::sync::Mutex;

  use async_trait::async_trait;

  use super::*;
  use crate::completion::Instructions;
  use crate::config::Prompts;
  use crate::domain::GenerationSpec;

  /// Replays scripted replies and records every user prompt it receives.
  struct Scripted {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    seen: Mutex<Vec<String>>,
  }

  impl Scripted {
    fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
      Self { replies: Mutex::new(replies.into()), seen: Mutex::new(Vec::new()) }
    }
  }

  #[async_trait]
  impl CompletionClient for Scripted {
    async fn complete(&self, instructions: &Instructions) -> Result<String, CompletionError> {
      self.seen.lock().unwrap().push(instructions.user.clone());
      self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Err(CompletionError::Unavailable("script exhausted".into())))
    }
    fn name(&self) -> &str { "scripted" }
  }

  fn spec() -> EffectiveSpec {
    GenerationSpec {
      fields: vec!["Backend".into()],
      item_type: "open_ended".into(),
      requested_count: 5,
      ..Default::default()
    }
    .validate()
    .expect("valid spec")
  }

  #[tokio::test]
  async fn each_failure_forfeits_only_its_slot() {
    let client = Scripted::new(vec![
      Ok("```json\n{\"stem\": \"First replacement?\"}\n```".into()),
      Err(CompletionError::RateLimited("429".into())),
      Ok("not json at all".into()),
      Ok("{\"stem\": \"\", \"explanation\": \"blank\"}".into()),
    ]);
    let prompts = Prompts::default();
    let composer = PromptComposer::new(&prompts);
    let spec = spec();
    let mut validator = Validator::new(&spec);
    let backfill = Backfill::new(&client, &composer, Duration::from_secs(5), None);

    let out = backfill.run(&spec, &mut validator, vec!["Seen before?".into()], 4).await;
    assert_eq!(out.attempts, 4);
    assert_eq!(out.items.len(), 1);
    assert_eq!(out.items[0].stem, "First replacement?");
    assert!(out.last_error.as_deref().unwrap_or_default().contains("no stem"));
    assert!(!out.cut_short);

    let seen = client.seen.lock().unwrap();
    assert!(seen[0].contains("- Seen before?"));
    assert!(seen[1].contains("- First replacement?"));
  }

  #[tokio::test]
  async fn stops_once_need_is_met() {
    let client = Scripted::new(vec![
      Ok("{\"stem\": \"a?\"}".into()),
      Ok("{\"stem\": \"b?\"}".into()),
      Ok("{\"stem\": \"never requested\"}".into()),
    ]);
    let prompts = Prompts::default();
    let composer = PromptComposer::new(&prompts);
    let spec = spec();
    let mut validator = Validator::new(&spec);
    let backfill = Backfill::new(&client, &composer, Duration::from_secs(5), None);

    let out = backfill.run(&spec, &mut validator, Vec::new(), 2).await;
    assert_eq!(out.attempts, 2);
    assert_eq!(out.items.len(), 2);
    assert_eq!(client.seen.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn expired_deadline_skips_attempts() {
    let client = Scripted::new(vec![Ok("{\"stem\": \"a?\"}".into())]);
    let prompts = Prompts::default();
    let composer = PromptComposer::new(&prompts);
    let spec = spec();
    let mut validator = Validator::new(&spec);
    let backfill = Backfill::new(&client, &composer, Duration::from_secs(5), Some(Instant::now()));

    let out = backfill.run(&spec, &mut validator, Vec::new(), 3).await;
    assert!(out.cut_short);
    assert_eq!(out.attempts, 0);
    assert!(client.seen.lock().unwrap().is_empty());
  }
}
