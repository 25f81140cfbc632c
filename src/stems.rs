//! Read-only sample of previously generated stems, used only for dedup hinting.

use async_trait::async_trait;

use crate::config::ExistingStemCfg;
use crate::error::StemSourceError;

/// Collaborator serving `fetchExistingStems(fields, limit)`. Must be side-effect free.
#[async_trait]
pub trait StemSource: Send + Sync {
  async fn fetch_existing_stems(&self, fields: &[String], limit: usize) -> Result<Vec<String>, StemSourceError>;
}

/// Stem bank built once at startup from configuration. Never mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct StemBank {
  entries: Vec<ExistingStemCfg>,
}

impl StemBank {
  pub fn new(entries: Vec<ExistingStemCfg>) -> Self {
    let entries = entries.into_iter().filter(|e| !e.stem.trim().is_empty()).collect();
    Self { entries }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

#[async_trait]
impl StemSource for StemBank {
  async fn fetch_existing_stems(&self, fields: &[String], limit: usize) -> Result<Vec<String>, StemSourceError> {
    let wanted: Vec<String> = fields.iter().map(|f| f.to_lowercase()).collect();
    // Most recent entries last in the bank, so walk it backwards.
    let stems = self
      .entries
      .iter()
      .rev()
      .filter(|e| e.fields.iter().any(|f| wanted.contains(&f.to_lowercase())))
      .map(|e| e.stem.trim().to_string())
      .take(limit)
      .collect();
    Ok(stems)
  }
}
