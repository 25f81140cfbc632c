//! Candidate recovery from normalized model output, as three explicit stages:
//!
//! 1. `Parse`: strict JSON parse of the whole text.
//! 2. `Repair`: split the text at every item-opening marker (`{"stem":`), keep the leading
//!    run of balanced spans, stop at the first unbalanced one (truncation), and re-parse
//!    the balanced spans as one array.
//! 3. `FragmentBackfill`: only when no span balances. A looser pattern pulls item-shaped
//!    fragments out of the text regardless of the enclosing container, fills absent
//!    canonical keys from the request, and parses each fragment on its own. Fragments that
//!    still fail to parse are dropped.
//!
//! Each stage yields a non-empty list or falls through to the next one.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{EffectiveSpec, ItemTypeSpec};
use crate::error::RepairError;

/// Leading key of every item object.
pub const ITEM_MARKER_KEY: &str = "stem";

/// Loosely-typed object produced by parse/repair; fields may be missing or mistyped.
pub type CandidateItem = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
  Parse,
  Repair,
  FragmentBackfill,
}

#[derive(Debug)]
pub struct Recovered {
  pub stage: Stage,
  pub items: Vec<CandidateItem>,
}

fn marker_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"\{\s*"stem"\s*:"#).expect("static marker regex"))
}

/// Object opened by the marker, allowing one level of nested objects (option records).
/// String literals are matched whole, so braces inside them do not end the fragment.
fn fragment_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    let string = r#""(?:[^"\\]|\\.)*""#;
    let pattern = format!(r#"\{{\s*"stem"\s*:(?:{string}|[^{{}}"]|\{{(?:{string}|[^{{}}"])*\}})*\}}"#);
    Regex::new(&pattern).expect("static fragment regex")
  })
}

/// Run the stages in order. Errors only when the text has no item marker at all and the
/// strict parse found nothing.
pub fn recover(text: &str, spec: &EffectiveSpec) -> Result<Recovered, RepairError> {
  let items = parse_strict(text);
  if !items.is_empty() {
    return Ok(Recovered { stage: Stage::Parse, items });
  }
  repair(text, spec)
}

/// Strict parse. Accepts an array of objects, a single item object, or an object wrapping
/// one array of objects (`{"items": [...]}`). Anything else yields an empty list.
pub fn parse_strict(text: &str) -> Vec<CandidateItem> {
  match serde_json::from_str::<Value>(text) {
    Ok(v) => items_from_value(v),
    Err(_) => Vec::new(),
  }
}

fn items_from_value(v: Value) -> Vec<CandidateItem> {
  match v {
    Value::Array(arr) => arr
      .into_iter()
      .filter_map(|e| match e {
        Value::Object(m) => Some(m),
        _ => None,
      })
      .collect(),
    Value::Object(m) if m.contains_key(ITEM_MARKER_KEY) => vec![m],
    Value::Object(m) => m
      .into_iter()
      .find_map(|(_, inner)| match inner {
        Value::Array(a) if a.iter().any(Value::is_object) => Some(a),
        _ => None,
      })
      .map(|a| items_from_value(Value::Array(a)))
      .unwrap_or_default(),
    _ => Vec::new(),
  }
}

/// Stages 2 and 3.
pub fn repair(text: &str, spec: &EffectiveSpec) -> Result<Recovered, RepairError> {
  let starts: Vec<usize> = marker_re().find_iter(text).map(|m| m.start()).collect();
  if starts.is_empty() {
    return Err(RepairError::NoItemMarker);
  }

  let spans = balanced_spans(text, &starts);
  debug!(target: "pipeline", markers = starts.len(), balanced = spans.len(), "Structural repair scan");
  if !spans.is_empty() {
    let mut items = parse_strict(&format!("[{}]", spans.join(",")));
    if items.is_empty() {
      // one bad span poisons the joined array; keep the spans that parse alone
      items = spans.iter().flat_map(|s| parse_strict(s)).collect();
    }
    if !items.is_empty() {
      return Ok(Recovered { stage: Stage::Repair, items });
    }
  }

  let items = fragment_re()
    .find_iter(text)
    .filter_map(|m| {
      let patched = backfill_fragment(m.as_str(), spec);
      match serde_json::from_str::<Value>(&patched) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
      }
    })
    .collect();
  Ok(Recovered { stage: Stage::FragmentBackfill, items })
}

/// Spans run from one marker to the next (or end of text). Leading balanced spans are
/// kept, trimmed to their object; the first unbalanced span ends the scan.
fn balanced_spans<'t>(text: &'t str, starts: &[usize]) -> Vec<&'t str> {
  let mut out = Vec::new();
  for (i, &start) in starts.iter().enumerate() {
    let end = starts.get(i + 1).copied().unwrap_or(text.len());
    match balanced_prefix(&text[start..end]) {
      Some(obj) => out.push(obj),
      None => break,
    }
  }
  out
}

/// Shortest prefix whose opening and closing delimiter counts match, ignoring string
/// contents. `None` when the counts never meet inside the span.
fn balanced_prefix(span: &str) -> Option<&str> {
  let mut opens = 0usize;
  let mut closes = 0usize;
  let mut in_string = false;
  let mut escaped = false;

  for (i, c) in span.char_indices() {
    if in_string {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
      }
      continue;
    }
    match c {
      '"' => in_string = true,
      '{' | '[' => opens += 1,
      '}' | ']' => {
        closes += 1;
        if closes == opens {
          return Some(&span[..i + c.len_utf8()]);
        }
        if closes > opens {
          return None;
        }
      }
      _ => {}
    }
  }
  None
}

/// Insert canonical values for absent keys right after the fragment's opening brace.
fn backfill_fragment(fragment: &str, spec: &EffectiveSpec) -> String {
  let mut defaults: Vec<(&str, Value)> = Vec::new();
  if let ItemTypeSpec::Concrete(t) = spec.item_type {
    defaults.push(("itemType", Value::from(t.as_str())));
  }
  defaults.push(("level", Value::from(spec.level.as_str())));
  defaults.push(("difficulty", Value::from(spec.difficulty.as_str())));
  defaults.push(("category", Value::from(spec.category.clone())));
  defaults.push(("fields", Value::from(spec.fields.clone())));
  defaults.push(("topics", Value::from(spec.topics.clone())));
  defaults.push(("skills", Value::from(spec.skills.clone())));

  let missing: Vec<String> = defaults
    .into_iter()
    .filter(|(key, _)| !fragment.contains(&format!("\"{key}\"")))
    .map(|(key, value)| format!("\"{key}\": {value}"))
    .collect();
  if missing.is_empty() {
    return fragment.to_string();
  }
  // fragments always start with '{'
  format!("{{{}, {}", missing.join(", "), &fragment[1..])
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::domain::GenerationSpec;

  fn spec() -> EffectiveSpec {
    GenerationSpec {
      fields: vec!["Backend".into()],
      level: Some("Middle".into()),
      difficulty: Some("medium".into()),
      item_type: "multiple_choice".into(),
      requested_count: 5,
      ..Default::default()
    }
    .validate()
    .expect("valid spec")
  }

  fn item(n: usize) -> String {
    format!(
      r#"{{"stem": "Question {n}?", "itemType": "multiple_choice", "options": [{{"text": "a", "isCorrect": true}}, {{"text": "b", "isCorrect": false}}]}}"#
    )
  }

  fn stems(items: &[CandidateItem]) -> Vec<String> {
    items.iter().filter_map(|i| i.get("stem").and_then(Value::as_str).map(str::to_string)).collect()
  }

  #[test]
  fn strict_parse_accepts_wrappers() {
    let arr = format!("[{},{}]", item(1), item(2));
    assert_eq!(parse_strict(&arr).len(), 2);
    assert_eq!(parse_strict(&item(1)).len(), 1);
    let wrapped = format!(r#"{{"items": [{},{}]}}"#, item(1), item(2));
    assert_eq!(parse_strict(&wrapped).len(), 2);
    assert!(parse_strict("\"just a string\"").is_empty());
  }

  #[test]
  fn truncated_after_third_item_recovers_three() {
    let text = format!(
      "[\n{},\n{},\n{},\n{{\"stem\": \"Question 4?\", \"options\": [{{\"text\": \"a\", \"isCo",
      item(1), item(2), item(3)
    );
    let rec = recover(&text, &spec()).expect("recoverable");
    assert_eq!(rec.stage, Stage::Repair);
    assert_eq!(stems(&rec.items), vec!["Question 1?", "Question 2?", "Question 3?"]);
  }

  #[test]
  fn stops_at_first_unbalanced_span() {
    // second item is broken; the intact third must not be resurrected by the strict stage
    let broken = r#"{"stem": "Question 2?", "options": [{"text": "a"}"#;
    let text = format!("[{}, {}, {}]", item(1), broken, item(3));
    let rec = recover(&text, &spec()).expect("recoverable");
    assert_eq!(rec.stage, Stage::Repair);
    assert_eq!(stems(&rec.items), vec!["Question 1?"]);
  }

  #[test]
  fn prose_around_items_is_ignored() {
    let text = format!("Here are your questions:\n{}\n{}\nHope this helps!", item(1), item(2));
    let rec = recover(&text, &spec()).expect("recoverable");
    assert_eq!(stems(&rec.items), vec!["Question 1?", "Question 2?"]);
  }

  #[test]
  fn no_marker_is_an_error() {
    let err = recover("I cannot help with that.", &spec()).unwrap_err();
    assert_eq!(err, RepairError::NoItemMarker);
  }

  #[test]
  fn fragment_stage_backfills_absent_keys() {
    // first span never balances, so only the loose pattern can find the second item
    let text = r#"[{"stem": "Broken [", {"stem": "Loose one?", "explanation": "because"}]"#;
    let rec = recover(text, &spec()).expect("recoverable");
    assert_eq!(rec.stage, Stage::FragmentBackfill);
    assert_eq!(rec.items.len(), 1);
    let obj = &rec.items[0];
    assert_eq!(obj.get("stem").and_then(Value::as_str), Some("Loose one?"));
    assert_eq!(obj.get("itemType").and_then(Value::as_str), Some("multiple_choice"));
    assert_eq!(obj.get("level").and_then(Value::as_str), Some("middle"));
    assert_eq!(obj.get("fields"), Some(&serde_json::json!(["Backend"])));
  }

  #[test]
  fn unparsable_fragments_are_dropped() {
    let text = r#"{"stem": oops [ {"stem": bad value}"#;
    let rec = recover(text, &spec()).expect("marker present");
    assert_eq!(rec.stage, Stage::FragmentBackfill);
    assert!(rec.items.is_empty());
  }

  #[test]
  fn balance_ignores_delimiters_in_strings() {
    let span = r#"{"stem": "why does } close { here?", "tags": ["]"]}, trailing"#;
    assert_eq!(
      balanced_prefix(span),
      Some(r#"{"stem": "why does } close { here?", "tags": ["]"]}"#)
    );
    assert_eq!(balanced_prefix(r#"{"stem": "open"#), None);
  }

  #[test]
  fn fragment_braces_inside_strings_do_not_cut_the_item() {
    let text = r#"[{"stem": "Broken [", {"stem": "What does } do?", "explanation": "closes a { block"}]"#;
    let rec = recover(text, &spec()).expect("recoverable");
    assert_eq!(rec.stage, Stage::FragmentBackfill);
    assert_eq!(stems(&rec.items), vec!["What does } do?"]);
    assert_eq!(rec.items[0].get("explanation").and_then(Value::as_str), Some("closes a { block"));
  }

  proptest! {
    #[test]
    fn truncation_keeps_exactly_the_complete_items(n in 1usize..6, cut in 0usize..1000) {
      let items: Vec<String> = (1..=n).map(item).collect();
      let text = format!("[{}]", items.join(",\n"));
      let cut = cut.min(text.len());

      let mut end = 1;
      let mut complete = 0;
      for it in &items {
        end += it.len();
        if end <= cut {
          complete += 1;
        }
        end += 2;
      }

      let recovered = recover(&text[..cut], &spec()).map(|r| r.items.len()).unwrap_or(0);
      prop_assert_eq!(recovered, complete);
    }
  }
}
