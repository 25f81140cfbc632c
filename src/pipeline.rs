//! Generation pipeline: request → batch call → normalize → recover → validate →
//! backfill → aggregate.
//!
//! Flow:
//! 1) Pre-validate the request. Nothing invalid reaches the backend.
//! 2) Fetch a read-only sample of existing stems (best effort) for dedup hinting.
//! 3) One batch call for all items. A failed, timed-out or unreadable batch counts as
//!    zero recovered items.
//! 4) Sequential singleton backfill for any shortfall.
//! 5) Aggregate: first N in arrival order; hard failure only when nothing was generated.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::backfill::Backfill;
use crate::completion::{call_limit, complete_within, CompletionClient};
use crate::config::{Mode, PipelineSettings, Prompts};
use crate::domain::{EffectiveSpec, GenerationResult, GenerationSpec, Outcome, ValidatedItem};
use crate::error::{PipelineError, StemSourceError};
use crate::normalize::normalize;
use crate::prompt::PromptComposer;
use crate::repair::recover;
use crate::stems::StemSource;
use crate::util::trunc_for_log;
use crate::validate::Validator;

/// Why aggregation saw fewer items than requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shortfall {
  BackfillExhausted,
  DeadlinePassed,
}

#[derive(Clone)]
pub struct Generator {
  client: Arc<dyn CompletionClient>,
  stems: Arc<dyn StemSource>,
  prompts: Prompts,
  settings: PipelineSettings,
}

impl Generator {
  pub fn new(
    client: Arc<dyn CompletionClient>,
    stems: Arc<dyn StemSource>,
    prompts: Prompts,
    settings: PipelineSettings,
  ) -> Self {
    Self { client, stems, prompts, settings }
  }

  pub fn backend_name(&self) -> &str {
    self.client.name()
  }

  /// Run one invocation. No state is shared with concurrent invocations.
  #[instrument(level = "info", skip(self, request), fields(invocation = %Uuid::new_v4(), requested = request.requested_count))]
  pub async fn generate(&self, request: &GenerationSpec) -> Result<GenerationResult, PipelineError> {
    let spec = request.validate().map_err(|e| {
      warn!(target: "pipeline", error = %e, "Rejected generation request");
      PipelineError::from(e)
    })?;

    let deadline = self.settings.deadline().map(|d| Instant::now() + d);
    let call_timeout = self.settings.call_timeout();
    let composer = PromptComposer::new(&self.prompts);
    let mut validator = Validator::new(&spec);
    let mut last_error: Option<String> = None;
    let mut cut_short = false;

    let sample = self.fetch_sample(&spec).await;

    let mut items = match call_limit(call_timeout, deadline) {
      Some(limit) => {
        let instructions = composer.batch(&spec, &sample);
        match complete_within(self.client.as_ref(), &instructions, limit).await {
          Ok(raw) => accept_batch(&raw, &spec, &mut validator, &mut last_error),
          Err(e) => {
            warn!(target: "pipeline", error = %e, "Batch call failed; falling through to backfill");
            last_error = Some(e.to_string());
            Vec::new()
          }
        }
      }
      None => {
        cut_short = true;
        Vec::new()
      }
    };
    info!(target: "pipeline", recovered = items.len(), requested = spec.requested_count, "Batch stage finished");

    let shortfall = spec.requested_count.saturating_sub(items.len());
    if shortfall > 0 && !cut_short {
      let avoid: Vec<String> = sample.iter().cloned().chain(items.iter().map(|i| i.stem.clone())).collect();
      let backfill = Backfill::new(self.client.as_ref(), &composer, call_timeout, deadline);
      let out = backfill.run(&spec, &mut validator, avoid, shortfall).await;
      items.extend(out.items);
      if out.last_error.is_some() {
        last_error = out.last_error;
      }
      cut_short = out.cut_short;
    }

    if cut_short && items.len() < spec.requested_count && self.settings.mode == Mode::Strict {
      error!(target: "pipeline", generated = items.len(), "Deadline passed in strict mode");
      return Err(PipelineError::Cancelled {
        detail: format!("deadline passed with {} of {} items generated", items.len(), spec.requested_count),
      });
    }

    let reason = if cut_short { Shortfall::DeadlinePassed } else { Shortfall::BackfillExhausted };
    aggregate(items, spec, reason, last_error)
  }

  /// Best effort: any failure degrades to an empty sample.
  async fn fetch_sample(&self, spec: &EffectiveSpec) -> Vec<String> {
    let limit = self.settings.sample_limit;
    if limit == 0 {
      return Vec::new();
    }
    let timeout = self.settings.call_timeout();
    let fetched = match tokio::time::timeout(timeout, self.stems.fetch_existing_stems(&spec.fields, limit)).await {
      Ok(res) => res,
      Err(_) => Err(StemSourceError::Unavailable(format!("no answer within {timeout:?}"))),
    };
    match fetched {
      Ok(mut stems) => {
        stems.truncate(limit);
        stems
      }
      Err(e) => {
        warn!(target: "pipeline", error = %e, "Existing stem sample unavailable; prompting without dedup hints");
        Vec::new()
      }
    }
  }
}

/// Normalize, recover and validate the batch response. Rejections are logged and skipped.
fn accept_batch(
  raw: &str,
  spec: &EffectiveSpec,
  validator: &mut Validator<'_>,
  last_error: &mut Option<String>,
) -> Vec<ValidatedItem> {
  let text = normalize(raw);
  let recovered = match recover(&text, spec) {
    Ok(r) => r,
    Err(e) => {
      warn!(target: "pipeline", error = %e, preview = %trunc_for_log(&text, 200), "Batch output unrecoverable");
      *last_error = Some(e.to_string());
      return Vec::new();
    }
  };

  let candidates = recovered.items.len();
  let mut accepted = Vec::with_capacity(candidates);
  for (idx, candidate) in recovered.items.iter().enumerate() {
    match validator.validate(candidate) {
      Ok(item) => accepted.push(item),
      Err(e) => {
        warn!(target: "pipeline", idx, error = %e, "Batch item rejected");
        *last_error = Some(e.to_string());
      }
    }
  }
  info!(target: "pipeline", stage = ?recovered.stage, candidates, accepted = accepted.len(), "Batch output recovered");
  accepted
}

/// Result Aggregator: first `requested` items in arrival order, no reordering.
pub fn aggregate(
  mut items: Vec<ValidatedItem>,
  spec: EffectiveSpec,
  reason: Shortfall,
  last_error: Option<String>,
) -> Result<GenerationResult, PipelineError> {
  let requested = spec.requested_count;
  items.truncate(requested);
  let generated = items.len();

  if generated == 0 {
    let detail = last_error.unwrap_or_else(|| "model produced no usable items".into());
    error!(target: "pipeline", %detail, "Generation produced zero items");
    return Err(PipelineError::HardFailure { detail });
  }

  let (outcome, note) = if generated == requested {
    (Outcome::Success, format!("success: generated all {requested} requested items"))
  } else {
    let why = match reason {
      Shortfall::BackfillExhausted => "backfill attempts exhausted",
      Shortfall::DeadlinePassed => "deadline passed before backfill finished",
    };
    (Outcome::Partial, format!("partial: generated {generated} of {requested} requested items; {why}"))
  };

  info!(target: "pipeline", generated, requested, outcome = ?outcome, "Generation finished");
  Ok(GenerationResult { items, generated, requested, context: spec, outcome, note })
}
