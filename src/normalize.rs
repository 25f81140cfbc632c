//! Syntax Normalizer: strips wrapper artifacts from raw completion text.
//!
//! Steps, in order: drop fence tokens, drop separators that directly precede a closing
//! `]`/`}`, collapse blank-line runs, trim. The transform is idempotent: no step can
//! rebuild what an earlier step removed.

/// Normalize raw model output. Clean text passes through unchanged.
pub fn normalize(raw: &str) -> String {
  let unfenced = strip_fences(raw);
  let no_trailing = drop_trailing_separators(&unfenced);
  collapse_blank_lines(&no_trailing).trim().to_string()
}

/// Remove every run of three or more backticks outside string literals, together with
/// the language tag glued to it (```` ```json ````). Fences may share a line with content.
fn strip_fences(text: &str) -> String {
  let chars: Vec<char> = text.chars().collect();
  let mut out = String::with_capacity(text.len());
  let mut in_string = false;
  let mut escaped = false;
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    if in_string {
      out.push(c);
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == '"' {
        in_string = false;
      }
      i += 1;
      continue;
    }
    if c == '`' {
      let run = chars[i..].iter().take_while(|&&b| b == '`').count();
      if run >= 3 {
        i += run;
        while i < chars.len() && is_tag_char(chars[i]) {
          i += 1;
        }
      } else {
        out.extend(&chars[i..i + run]);
        i += run;
      }
      continue;
    }
    if c == '"' {
      in_string = true;
    }
    out.push(c);
    i += 1;
  }
  out
}

fn is_tag_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')
}

/// Remove commas outside string literals whose next significant character (skipping
/// whitespace and further commas) closes a structure.
fn drop_trailing_separators(text: &str) -> String {
  let chars: Vec<char> = text.chars().collect();
  let mut out = String::with_capacity(text.len());
  let mut in_string = false;
  let mut escaped = false;

  for (i, &c) in chars.iter().enumerate() {
    if in_string {
      out.push(c);
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
      '"' => {
        in_string = true;
        out.push(c);
      }
      ',' => {
        let next = chars[i + 1..].iter().find(|n| !n.is_whitespace() && **n != ',');
        if !matches!(next, Some(']') | Some('}')) {
          out.push(c);
        }
      }
      _ => out.push(c),
    }
  }
  out
}

fn collapse_blank_lines(text: &str) -> String {
  text
    .lines()
    .filter(|line| !line.trim().is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
  }

  #[test]
  fn strips_fences_and_trailing_commas() {
    let raw = "```json\n[\n  {\"stem\": \"a\", \"tags\": [\"x\",],},\n\n\n  {\"stem\": \"b\"},\n]\n```\n";
    let out = normalize(raw);
    let v: serde_json::Value = serde_json::from_str(&out).expect("valid json after normalize");
    assert_eq!(v.as_array().map(|a| a.len()), Some(2));
    assert!(!out.contains("```"));
  }

  #[test]
  fn clean_text_is_untouched() {
    let clean = "[\n  {\"stem\": \"What is 2, really?\", \"tags\": [\"math\"]}\n]";
    assert_eq!(normalize(clean), clean);
  }

  #[test]
  fn idempotent_on_messy_input() {
    let messy = "\n```\n[{\"stem\":\"x\",,\n,\n}, {\"stem\": \"code: ```rs```\"},]\n```";
    let once = normalize(messy);
    let twice = normalize(&once);
    assert_eq!(squash(&once), squash(&twice));
    assert_eq!(once, twice);
  }

  #[test]
  fn commas_inside_strings_survive() {
    let text = r#"{"stem": "pick one of a, ]", "explanation": "escaped \", }"}"#;
    assert_eq!(normalize(text), text);
  }

  #[test]
  fn fences_sharing_a_line_with_content_are_removed() {
    let closing_glued = "```json\n{\"stem\": \"a?\"}```";
    assert_eq!(normalize(closing_glued), r#"{"stem": "a?"}"#);

    let one_line = "```json [{\"stem\": \"a?\"}, {\"stem\": \"b?\"},] ```";
    let v: serde_json::Value = serde_json::from_str(&normalize(one_line)).expect("array after normalize");
    assert_eq!(v.as_array().map(|a| a.len()), Some(2));
  }

  #[test]
  fn fence_between_separators_settles_in_one_pass() {
    let once = normalize("[1,\n```,\n]");
    assert_eq!(once, "[1\n]");
    assert_eq!(normalize(&once), once);
  }

  proptest! {
    #[test]
    fn normalize_is_idempotent_on_json_like_text(raw in r#"[\[\]{}:,"`\\a-c0-9 \n\r\t]{0,64}"#) {
      let once = normalize(&raw);
      prop_assert_eq!(normalize(&once), once);
    }

    #[test]
    fn normalize_is_idempotent_on_any_text(raw in any::<String>()) {
      let once = normalize(&raw);
      prop_assert_eq!(normalize(&once), once);
    }
  }
}
