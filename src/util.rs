//! Small utility helpers used across modules.

/// Parse a comma-separated env value into a list. `*` stays a single wildcard entry.
pub fn parse_list(value: &str) -> Vec<String> {
  if value.trim() == "*" {
    return vec!["*".to_string()];
  }
  value
    .split(',')
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .collect()
}

/// Only a case-insensitive `true` counts as true.
pub fn parse_bool(value: &str) -> bool {
  value.trim().eq_ignore_ascii_case("true")
}

/// List-valued env var; unset or empty falls back to `default`.
pub fn env_list(key: &str, default: &str) -> Vec<String> {
  match std::env::var(key) {
    Ok(v) if !v.trim().is_empty() => parse_list(&v),
    _ => parse_list(default),
  }
}

/// Bool-valued env var; unset or empty falls back to `default`.
pub fn env_bool(key: &str, default: bool) -> bool {
  match std::env::var(key) {
    Ok(v) if !v.trim().is_empty() => parse_bool(&v),
    _ => default,
  }
}

/// Credential env var; unset, empty and whitespace-only all count as absent.
pub fn env_secret(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with whole model outputs. Cuts on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let cut = s
    .char_indices()
    .map(|(i, _)| i)
    .take_while(|i| *i <= max)
    .last()
    .unwrap_or(0);
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
