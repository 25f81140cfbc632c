//! Application state: prompts and pipeline settings, the read-only stem bank, and the
//! generator (present only when a completion backend is configured).
//!
//! Nothing in here is mutated after startup, so invocations never contend on it.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{load_generator_config_from_env, GeneratorConfig};
use crate::openai::OpenAI;
use crate::pipeline::Generator;
use crate::stems::StemBank;

#[derive(Clone)]
pub struct AppState {
    pub generator: Option<Generator>,
}

impl AppState {
    /// Build state from env: load config, build the stem bank, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_generator_config_from_env().unwrap_or_default();
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: GeneratorConfig) -> Self {
        let GeneratorConfig { prompts, pipeline, existing } = cfg;
        let bank = StemBank::new(existing);
        info!(target: "itemforge", existing_stems = bank.len(), sample_limit = pipeline.sample_limit, "Stem bank ready");

        let openai = OpenAI::from_env(pipeline.temperature, pipeline.call_timeout());
        let generator = match openai {
            Some(oa) => {
                info!(target: "itemforge", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
                Some(Generator::new(Arc::new(oa), Arc::new(bank), prompts, pipeline))
            }
            None => {
                warn!(target: "itemforge", "OpenAI disabled (no OPENAI_API_KEY). Generation requests will be refused.");
                None
            }
        };

        Self { generator }
    }

    /// State around an explicit generator; used by tests and embedding callers.
    pub fn with_generator(generator: Generator) -> Self {
        Self { generator: Some(generator) }
    }
}
