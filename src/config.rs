//! Loading generator configuration (prompts, pipeline settings, existing-stem bank) from TOML.
//!
//! See `GeneratorConfig`, `Prompts` and `PipelineSettings` for expected schema.

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, error};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GeneratorConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub pipeline: PipelineSettings,
  #[serde(default)]
  pub existing: Vec<ExistingStemCfg>,
}

/// Previously generated stem accepted in TOML configuration.
/// Read-only: used to steer prompts away from duplicates, never as a filter.
#[derive(Clone, Debug, Deserialize)]
pub struct ExistingStemCfg {
  pub fields: Vec<String>,
  pub stem: String,
}

/// How the pipeline reacts when its overall deadline passes mid-run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  /// Return whatever has been validated so far.
  #[default]
  BestEffort,
  /// Treat the deadline as a hard failure.
  Strict,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
  pub call_timeout_secs: u64,
  pub sample_limit: usize,
  pub temperature: f32,
  pub deadline_secs: Option<u64>,
  pub mode: Mode,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      call_timeout_secs: 60,
      sample_limit: 15,
      temperature: 0.7,
      deadline_secs: None,
      mode: Mode::BestEffort,
    }
  }
}

impl PipelineSettings {
  pub fn call_timeout(&self) -> Duration {
    Duration::from_secs(self.call_timeout_secs.max(1))
  }

  pub fn deadline(&self) -> Option<Duration> {
    self.deadline_secs.map(Duration::from_secs)
  }
}

/// Prompt templates used by the composer. `{placeholder}` values are filled per request.
/// Batch templates see `{count}`; every template sees the context placeholders
/// (`{fields}`, `{topics}`, `{skills}`, `{level}`, `{difficulty}`, `{category}`,
/// `{item_rules}`, `{shape}`).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub batch_system: String,
  pub batch_user_template: String,
  pub single_system: String,
  pub single_user_template: String,
  /// Sees `{stems}`.
  pub dedup_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      batch_system: "You are an assessment item generator for technical interviews. You output raw JSON only and you always return exactly the number of items requested.".into(),
      batch_user_template: "Generate exactly {count} assessment items.\n\nContext:\n- Fields: {fields}\n- Topics: {topics}\n- Skills: {skills}\n- Level: {level}\n- Difficulty: {difficulty}\n- Category: {category}\n\nItem rules: {item_rules}\n\nReturn a JSON array of exactly {count} objects. Each object must have this shape, with \"stem\" as the first key:\n{shape}".into(),
      single_system: "You are an assessment item generator for technical interviews. You output one raw JSON object only.".into(),
      single_user_template: "Generate exactly ONE assessment item.\n\nContext:\n- Fields: {fields}\n- Topics: {topics}\n- Skills: {skills}\n- Level: {level}\n- Difficulty: {difficulty}\n- Category: {category}\n\nItem rules: {item_rules}\n\nReturn one JSON object with this shape, with \"stem\" as the first key:\n{shape}".into(),
      dedup_template: "These items already exist. Do NOT repeat or paraphrase them:\n{stems}\nTo stay distinct: use a different question framing, change the scenario context, and emphasize a different aspect of the topic.".into(),
    }
  }
}

/// Parse a TOML document into `GeneratorConfig`.
pub fn parse_config(raw: &str) -> Result<GeneratorConfig, toml::de::Error> {
  toml::from_str::<GeneratorConfig>(raw)
}

/// Attempt to load `GeneratorConfig` from GENERATOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_generator_config_from_env() -> Option<GeneratorConfig> {
  let path = std::env::var("GENERATOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "itemforge", %path, existing = cfg.existing.len(), "Loaded generator config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "itemforge", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "itemforge", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
