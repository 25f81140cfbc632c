//! Domain models: the generation request, its effective (canonicalized) form,
//! and the items and results the pipeline produces.

use serde::{Deserialize, Serialize};

use crate::error::SpecValidationError;

pub const MIN_REQUESTED: i64 = 1;
pub const MAX_REQUESTED: i64 = 20;

/// Seniority the items are pitched at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
  Junior,
  #[default]
  Middle,
  Senior,
  Lead,
}

impl Level {
  /// Alias lookup; `None` for anything outside the table.
  pub fn from_alias(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "junior" | "jr" | "entry" | "beginner" | "trainee" | "intern" => Some(Level::Junior),
      "middle" | "mid" | "intermediate" | "regular" => Some(Level::Middle),
      "senior" | "sr" | "advanced" | "expert" => Some(Level::Senior),
      "lead" | "principal" | "staff" | "architect" => Some(Level::Lead),
      _ => None,
    }
  }

  /// Canonicalize, falling back to the baseline level.
  pub fn canonicalize(raw: Option<&str>) -> Self {
    raw.and_then(Level::from_alias).unwrap_or_default()
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Level::Junior => "junior",
      Level::Middle => "middle",
      Level::Senior => "senior",
      Level::Lead => "lead",
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  #[default]
  Medium,
  Hard,
}

impl Difficulty {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "easy" => Some(Difficulty::Easy),
      "medium" => Some(Difficulty::Medium),
      "hard" => Some(Difficulty::Hard),
      _ => None,
    }
  }

  pub fn canonicalize(raw: Option<&str>) -> Self {
    raw.and_then(Difficulty::parse).unwrap_or_default()
  }

  /// Minutes used when the model does not supply an estimate.
  pub fn default_minutes(self) -> u32 {
    match self {
      Difficulty::Easy => 1,
      Difficulty::Medium => 2,
      Difficulty::Hard => 4,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

/// Concrete item kinds. `ItemTypeSpec::Mixed` resolves to one of these per item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
  /// Single-select: exactly one correct option.
  MultipleChoice,
  /// Two or more correct options.
  MultiSelect,
  /// Single-select with two options.
  TrueFalse,
  OpenEnded,
  Coding,
}

impl ItemType {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_lowercase().as_str() {
      "multiple_choice" => Some(ItemType::MultipleChoice),
      "multi_select" => Some(ItemType::MultiSelect),
      "true_false" => Some(ItemType::TrueFalse),
      "open_ended" => Some(ItemType::OpenEnded),
      "coding" => Some(ItemType::Coding),
      _ => None,
    }
  }

  pub fn is_choice(self) -> bool {
    matches!(self, ItemType::MultipleChoice | ItemType::MultiSelect | ItemType::TrueFalse)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ItemType::MultipleChoice => "multiple_choice",
      ItemType::MultiSelect => "multi_select",
      ItemType::TrueFalse => "true_false",
      ItemType::OpenEnded => "open_ended",
      ItemType::Coding => "coding",
    }
  }
}

/// Requested item type: a concrete kind or the `mixed` meta-value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemTypeSpec {
  Concrete(ItemType),
  Mixed,
}

impl ItemTypeSpec {
  pub fn parse(raw: &str) -> Option<Self> {
    if raw.trim().eq_ignore_ascii_case("mixed") {
      return Some(ItemTypeSpec::Mixed);
    }
    ItemType::parse(raw).map(ItemTypeSpec::Concrete)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ItemTypeSpec::Concrete(t) => t.as_str(),
      ItemTypeSpec::Mixed => "mixed",
    }
  }
}

impl Serialize for ItemTypeSpec {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

/// Raw generation request as supplied by the caller.
/// List fields win over their legacy single-value counterparts.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSpec {
  #[serde(default)] pub fields: Vec<String>,
  #[serde(default)] pub field: Option<String>,
  #[serde(default)] pub topics: Vec<String>,
  #[serde(default)] pub topic: Option<String>,
  #[serde(default)] pub skills: Vec<String>,
  #[serde(default)] pub skill: Option<String>,
  #[serde(default)] pub level: Option<String>,
  #[serde(default)] pub difficulty: Option<String>,
  #[serde(default)] pub category: Option<String>,
  #[serde(default)] pub item_type: String,
  #[serde(default)] pub requested_count: i64,
  #[serde(default)] pub custom_prompt: Option<String>,
}

impl GenerationSpec {
  /// Pre-validate and resolve every effective value. Runs before any network call.
  pub fn validate(&self) -> Result<EffectiveSpec, SpecValidationError> {
    let fields = effective_list(&self.fields, self.field.as_deref());
    if fields.is_empty() {
      return Err(SpecValidationError::EmptyFields);
    }
    let item_type = ItemTypeSpec::parse(&self.item_type)
      .ok_or_else(|| SpecValidationError::UnknownItemType(self.item_type.clone()))?;
    if !(MIN_REQUESTED..=MAX_REQUESTED).contains(&self.requested_count) {
      return Err(SpecValidationError::CountOutOfRange(self.requested_count));
    }

    let category = self
      .category
      .as_deref()
      .map(str::trim)
      .filter(|c| !c.is_empty())
      .map(str::to_string)
      .unwrap_or_else(|| fields[0].clone());

    Ok(EffectiveSpec {
      topics: effective_list(&self.topics, self.topic.as_deref()),
      skills: effective_list(&self.skills, self.skill.as_deref()),
      fields,
      level: Level::canonicalize(self.level.as_deref()),
      difficulty: Difficulty::canonicalize(self.difficulty.as_deref()),
      category,
      item_type,
      requested_count: self.requested_count as usize,
      custom_prompt: self
        .custom_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string),
    })
  }
}

/// Explicit list → legacy single value → empty. Trimmed, empties dropped, de-duplicated.
fn effective_list(list: &[String], legacy: Option<&str>) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for v in list.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
    if !out.iter().any(|o| o == v) {
      out.push(v.to_string());
    }
  }
  if out.is_empty() {
    if let Some(v) = legacy.map(str::trim).filter(|v| !v.is_empty()) {
      out.push(v.to_string());
    }
  }
  out
}

/// Validated request with every fallback applied. Immutable for one invocation and
/// echoed back to the caller as the response `context`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSpec {
  pub fields: Vec<String>,
  pub topics: Vec<String>,
  pub skills: Vec<String>,
  pub level: Level,
  pub difficulty: Difficulty,
  pub category: String,
  pub item_type: ItemTypeSpec,
  pub requested_count: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub custom_prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRecord {
  pub text: String,
  pub is_correct: bool,
}

/// A schema-conformant item. Every field is either the model's well-typed value or the
/// effective request value.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedItem {
  pub stem: String,
  pub item_type: ItemType,
  pub level: Level,
  pub difficulty: Difficulty,
  pub category: String,
  pub fields: Vec<String>,
  pub topics: Vec<String>,
  pub skills: Vec<String>,
  pub explanation: String,
  /// Present exactly when `item_type` is choice-based, even if every option was dropped.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<OptionRecord>>,
  pub estimated_time: u32,
  pub tags: Vec<String>,
  /// Advisory rule violations; never a reason for rejection.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub advisories: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Success,
  Partial,
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerationResult {
  pub items: Vec<ValidatedItem>,
  pub generated: usize,
  pub requested: usize,
  pub context: EffectiveSpec,
  pub outcome: Outcome,
  pub note: String,
}
