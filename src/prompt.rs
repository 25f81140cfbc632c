//! Prompt Composer: turns an effective request (plus an optional dedup sample) into
//! instruction text. Pure; no failure mode.
//!
//! The requested count is stated both at the very start and at the very end of the user
//! message, since models weight instructions near the boundaries more heavily.

use crate::completion::{Instructions, ResponseShape};
use crate::config::Prompts;
use crate::domain::{EffectiveSpec, ItemType, ItemTypeSpec};
use crate::util::{clip, fill_template, join_or};

const OUTPUT_CONTRACT: &str = "Output contract: raw JSON only. Do not wrap the output in ``` markers or any other fence. No text before or after the JSON. No trailing commas before a closing ] or }.";

/// Longest stem quoted back in a dedup directive.
const DEDUP_STEM_MAX: usize = 200;

pub struct PromptComposer<'a> {
  prompts: &'a Prompts,
}

impl<'a> PromptComposer<'a> {
  pub fn new(prompts: &'a Prompts) -> Self {
    Self { prompts }
  }

  /// Instructions for the batch call asking for all items at once.
  pub fn batch(&self, spec: &EffectiveSpec, sample: &[String]) -> Instructions {
    let count = spec.requested_count.to_string();
    let head = fill_template_owned(&self.prompts.batch_user_template, &context_pairs(spec, &count));
    let tail = format!("Return exactly {count} items in the array, no more and no fewer.");
    Instructions {
      system: self.prompts.batch_system.clone(),
      user: self.assemble(head, spec, sample, tail),
      shape: ResponseShape::Array,
    }
  }

  /// Instructions for one singleton backfill call. `avoid` lists stems the replacement
  /// must not duplicate.
  pub fn single(&self, spec: &EffectiveSpec, avoid: &[String]) -> Instructions {
    let head = fill_template_owned(&self.prompts.single_user_template, &context_pairs(spec, "1"));
    let tail = "Return exactly ONE item as a single JSON object.".to_string();
    Instructions {
      system: self.prompts.single_system.clone(),
      user: self.assemble(head, spec, avoid, tail),
      shape: ResponseShape::Object,
    }
  }

  fn assemble(&self, head: String, spec: &EffectiveSpec, sample: &[String], tail: String) -> String {
    let mut parts = vec![head, OUTPUT_CONTRACT.to_string()];
    if let Some(custom) = &spec.custom_prompt {
      parts.push(format!("Additional instructions from the requester: {custom}"));
    }
    if !sample.is_empty() {
      let stems = sample
        .iter()
        .map(|s| format!("- {}", clip(s.trim(), DEDUP_STEM_MAX)))
        .collect::<Vec<_>>()
        .join("\n");
      parts.push(fill_template(&self.prompts.dedup_template, &[("stems", &stems)]));
    }
    parts.push(tail);
    parts.join("\n\n")
  }
}

fn context_pairs(spec: &EffectiveSpec, count: &str) -> Vec<(&'static str, String)> {
  vec![
    ("count", count.to_string()),
    ("fields", join_or(&spec.fields, "general")),
    ("topics", join_or(&spec.topics, "any relevant topic")),
    ("skills", join_or(&spec.skills, "any relevant skill")),
    ("level", spec.level.as_str().to_string()),
    ("difficulty", spec.difficulty.as_str().to_string()),
    ("category", spec.category.clone()),
    ("item_rules", item_rules(spec.item_type)),
    ("shape", item_shape(spec)),
  ]
}

fn fill_template_owned(tpl: &str, pairs: &[(&'static str, String)]) -> String {
  let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
  fill_template(tpl, &borrowed)
}

fn item_rules(item_type: ItemTypeSpec) -> String {
  match item_type {
    ItemTypeSpec::Concrete(t) => concrete_rule(t).to_string(),
    ItemTypeSpec::Mixed => format!(
      "alternate between two kinds. {} {}",
      concrete_rule(ItemType::MultipleChoice),
      concrete_rule(ItemType::MultiSelect)
    ),
  }
}

fn concrete_rule(t: ItemType) -> &'static str {
  match t {
    ItemType::MultipleChoice => "itemType \"multiple_choice\": 4 options, exactly ONE with isCorrect true.",
    ItemType::MultiSelect => "itemType \"multi_select\": 4 or 5 options, TWO OR MORE with isCorrect true.",
    ItemType::TrueFalse => "itemType \"true_false\": exactly 2 options, \"True\" and \"False\", exactly ONE correct.",
    ItemType::OpenEnded => "itemType \"open_ended\": no options; put a model answer in explanation.",
    ItemType::Coding => "itemType \"coding\": no options; the stem states the task and explanation outlines a reference solution.",
  }
}

/// Literal example object. Written by hand so "stem" stays the leading key.
fn item_shape(spec: &EffectiveSpec) -> String {
  let type_value = match spec.item_type {
    ItemTypeSpec::Concrete(t) => t.as_str().to_string(),
    ItemTypeSpec::Mixed => "multiple_choice | multi_select".to_string(),
  };
  let with_options = match spec.item_type {
    ItemTypeSpec::Concrete(t) => t.is_choice(),
    ItemTypeSpec::Mixed => true,
  };
  let list = |v: &[String]| serde_json::to_string(v).unwrap_or_else(|_| "[]".into());

  let mut lines = vec![
    "{".to_string(),
    "  \"stem\": \"<question text>\",".to_string(),
    format!("  \"itemType\": \"{type_value}\","),
    format!("  \"level\": \"{}\",", spec.level.as_str()),
    format!("  \"difficulty\": \"{}\",", spec.difficulty.as_str()),
    format!("  \"category\": {},", serde_json::Value::String(spec.category.clone())),
    format!("  \"fields\": {},", list(&spec.fields)),
    format!("  \"topics\": {},", list(&spec.topics)),
    format!("  \"skills\": {},", list(&spec.skills)),
    "  \"explanation\": \"<why the answer is correct>\",".to_string(),
  ];
  if with_options {
    lines.push("  \"options\": [{\"text\": \"<option>\", \"isCorrect\": true}, {\"text\": \"<option>\", \"isCorrect\": false}],".to_string());
  }
  lines.push(format!("  \"estimatedTime\": {},", spec.difficulty.default_minutes()));
  lines.push("  \"tags\": [\"<tag>\"]".to_string());
  lines.push("}".to_string());
  lines.join("\n")
}
