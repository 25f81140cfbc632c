//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge model payloads. Cuts on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  format!("{}… ({} bytes total)", head(s, max), s.len())
}

/// Prompt-safe truncation: at most `max` bytes of `s` plus an ellipsis, no size suffix.
pub fn clip(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  format!("{}…", head(s, max))
}

/// Longest prefix of at most `max` bytes ending on a char boundary.
fn head(s: &str, max: usize) -> &str {
  let cut = s.char_indices().map(|(i, _)| i).take_while(|i| *i <= max).last().unwrap_or(0);
  &s[..cut]
}

/// Comma-joined list, or a placeholder when empty.
pub fn join_or(items: &[String], empty: &str) -> String {
  if items.is_empty() { empty.to_string() } else { items.join(", ") }
}
