//! Schema Validator / Canonicalizer.
//!
//! A candidate is rejected only when its stem is missing or its item type cannot be
//! resolved. Every other field keeps the model's value when present and well-typed and
//! otherwise takes the effective request value. Option-correctness rules are advisory.

use serde_json::Value;
use thiserror::Error;

use crate::domain::{Difficulty, EffectiveSpec, ItemType, ItemTypeSpec, Level, OptionRecord, ValidatedItem};
use crate::repair::CandidateItem;

/// Estimated times above this are treated as malformed.
const MAX_MINUTES: u64 = 120;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
  #[error("item has no stem")]
  MissingStem,

  #[error("item declares type {declared:?}, incompatible with requested {requested}")]
  UnresolvedItemType { declared: String, requested: &'static str },
}

/// Value read from a candidate: present and well-typed, or absent/malformed.
#[derive(Debug, PartialEq)]
enum Field<T> {
  Present(T),
  Absent,
}

impl<T> Field<T> {
  fn or(self, fallback: T) -> T {
    match self {
      Field::Present(v) => v,
      Field::Absent => fallback,
    }
  }

  fn or_else(self, fallback: impl FnOnce() -> T) -> T {
    match self {
      Field::Present(v) => v,
      Field::Absent => fallback(),
    }
  }
}

/// One validator per invocation: `mixed` resolution alternates across every item that
/// needs it, batch and backfill alike.
pub struct Validator<'a> {
  spec: &'a EffectiveSpec,
  mixed_turn: usize,
}

impl<'a> Validator<'a> {
  pub fn new(spec: &'a EffectiveSpec) -> Self {
    Self { spec, mixed_turn: 0 }
  }

  pub fn validate(&mut self, candidate: &CandidateItem) -> Result<ValidatedItem, Rejection> {
    let stem = match string_field(candidate, &["stem"]) {
      Field::Present(s) => s,
      Field::Absent => return Err(Rejection::MissingStem),
    };
    let item_type = self.resolve_type(candidate)?;
    let spec = self.spec;

    let level = match string_field(candidate, &["level"]) {
      Field::Present(raw) => Level::from_alias(&raw).unwrap_or(spec.level),
      Field::Absent => spec.level,
    };
    let difficulty = match string_field(candidate, &["difficulty"]) {
      Field::Present(raw) => Difficulty::parse(&raw).unwrap_or(spec.difficulty),
      Field::Absent => spec.difficulty,
    };

    let mut advisories = Vec::new();
    let options = if item_type.is_choice() {
      let (options, dropped) = option_records(candidate);
      if dropped > 0 {
        advisories.push(format!("dropped {dropped} malformed option(s)"));
      }
      advisories.extend(option_advisories(item_type, &options));
      Some(options)
    } else {
      None
    };

    Ok(ValidatedItem {
      stem,
      item_type,
      level,
      difficulty,
      category: string_field(candidate, &["category"]).or_else(|| spec.category.clone()),
      fields: list_field(candidate, &["fields"]).or_else(|| spec.fields.clone()),
      topics: list_field(candidate, &["topics"]).or_else(|| spec.topics.clone()),
      skills: list_field(candidate, &["skills"]).or_else(|| spec.skills.clone()),
      explanation: string_field(candidate, &["explanation"]).or(String::new()),
      options,
      estimated_time: minutes_field(candidate).or(difficulty.default_minutes()),
      tags: list_field(candidate, &["tags"]).or_else(|| default_tags(spec)),
      advisories,
    })
  }

  fn resolve_type(&mut self, candidate: &CandidateItem) -> Result<ItemType, Rejection> {
    let raw = string_field(candidate, &["itemType", "item_type", "type"]);
    let declared = match &raw {
      Field::Present(s) => ItemType::parse(s),
      Field::Absent => None,
    };
    let requested_label = self.spec.item_type.as_str();
    let conflict = || Rejection::UnresolvedItemType {
      declared: match &raw {
        Field::Present(s) => s.clone(),
        Field::Absent => String::new(),
      },
      requested: requested_label,
    };

    match (self.spec.item_type, declared) {
      (ItemTypeSpec::Concrete(requested), None) => Ok(requested),
      (ItemTypeSpec::Concrete(requested), Some(t)) if t == requested => Ok(t),
      // same family: the request wins, correctness rules become advisories
      (ItemTypeSpec::Concrete(requested), Some(t)) if t.is_choice() && requested.is_choice() => Ok(requested),
      (ItemTypeSpec::Concrete(_), Some(_)) => Err(conflict()),
      (ItemTypeSpec::Mixed, Some(t @ (ItemType::MultipleChoice | ItemType::MultiSelect))) => Ok(t),
      (ItemTypeSpec::Mixed, Some(_)) => Err(conflict()),
      (ItemTypeSpec::Mixed, None) => {
        let t = if self.mixed_turn % 2 == 0 { ItemType::MultipleChoice } else { ItemType::MultiSelect };
        self.mixed_turn += 1;
        Ok(t)
      }
    }
  }
}

fn lookup<'c>(candidate: &'c CandidateItem, keys: &[&str]) -> Option<&'c Value> {
  keys.iter().find_map(|k| candidate.get(*k))
}

fn string_field(candidate: &CandidateItem, keys: &[&str]) -> Field<String> {
  match lookup(candidate, keys).and_then(Value::as_str).map(str::trim) {
    Some(s) if !s.is_empty() => Field::Present(s.to_string()),
    _ => Field::Absent,
  }
}

/// Well-typed only when every element is a string and at least one is non-empty.
fn list_field(candidate: &CandidateItem, keys: &[&str]) -> Field<Vec<String>> {
  let Some(Value::Array(arr)) = lookup(candidate, keys) else {
    return Field::Absent;
  };
  let mut out = Vec::with_capacity(arr.len());
  for v in arr {
    match v.as_str() {
      Some(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
      Some(_) => {}
      None => return Field::Absent,
    }
  }
  if out.is_empty() { Field::Absent } else { Field::Present(out) }
}

fn minutes_field(candidate: &CandidateItem) -> Field<u32> {
  match lookup(candidate, &["estimatedTime", "estimated_time"]).and_then(Value::as_u64) {
    Some(m) if (1..=MAX_MINUTES).contains(&m) => Field::Present(m as u32),
    _ => Field::Absent,
  }
}

/// Well-formed option records plus the count of dropped malformed entries.
fn option_records(candidate: &CandidateItem) -> (Vec<OptionRecord>, usize) {
  let Some(Value::Array(arr)) = candidate.get("options") else {
    return (Vec::new(), 0);
  };
  let mut dropped = 0;
  let mut out = Vec::with_capacity(arr.len());
  for entry in arr {
    let text = entry.get("text").and_then(Value::as_str).map(str::trim).filter(|t| !t.is_empty());
    let correct = entry.get("isCorrect").or_else(|| entry.get("is_correct")).and_then(Value::as_bool);
    match (text, correct) {
      (Some(text), Some(is_correct)) => out.push(OptionRecord { text: text.to_string(), is_correct }),
      _ => dropped += 1,
    }
  }
  (out, dropped)
}

fn option_advisories(item_type: ItemType, options: &[OptionRecord]) -> Vec<String> {
  let mut notes = Vec::new();
  let correct = options.iter().filter(|o| o.is_correct).count();
  if options.len() < 2 {
    notes.push(format!("choice item has {} option(s); expected at least two", options.len()));
  }
  match item_type {
    ItemType::TrueFalse if options.len() != 2 => {
      notes.push(format!("true_false item has {} options; expected exactly two", options.len()));
    }
    _ => {}
  }
  match item_type {
    ItemType::MultipleChoice | ItemType::TrueFalse if correct != 1 => {
      notes.push(format!("single-select item has {correct} correct options; expected exactly one"));
    }
    ItemType::MultiSelect if correct < 2 => {
      notes.push(format!("multi-select item has {correct} correct options; expected two or more"));
    }
    _ => {}
  }
  notes
}

/// Topics then skills, de-duplicated; fields when both are empty.
fn default_tags(spec: &EffectiveSpec) -> Vec<String> {
  let mut tags: Vec<String> = Vec::new();
  for t in spec.topics.iter().chain(spec.skills.iter()) {
    if !tags.contains(t) {
      tags.push(t.clone());
    }
  }
  if tags.is_empty() { spec.fields.clone() } else { tags }
}
