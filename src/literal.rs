//! Decoding loosely formatted model output into a JSON object.
//!
//! Models asked for a structured record often answer with something that is
//! almost JSON: a Python dict repr with single quotes, `True`/`None`, trailing
//! commas, tuples. We try strict JSON first and fall back to a small literal
//! grammar that accepts those forms. Only a mapping counts as success.
//!
//! The literal grammar rejects bare `true`/`false`/`null`; those
//! are only accepted through the strict JSON stage.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiteralError {
  #[error("unexpected end of input")]
  Eof,
  #[error("unexpected character {found:?} at offset {at}")]
  Unexpected { found: char, at: usize },
  #[error("unknown name {name:?} at offset {at}")]
  UnknownName { name: String, at: usize },
  #[error("invalid number {0:?}")]
  Number(String),
  #[error("invalid escape sequence at offset {0}")]
  Escape(usize),
  #[error("unsupported mapping key at offset {0}")]
  Key(usize),
  #[error("trailing input at offset {0}")]
  Trailing(usize),
  #[error("expected a mapping, found {0}")]
  NotAMapping(&'static str),
  #[error("nesting deeper than 128 levels at offset {0}")]
  TooDeep(usize),
}

/// Same nesting limit serde_json applies.
const MAX_DEPTH: usize = 128;

/// Two-stage decode of `text` into a mapping.
pub fn parse_mapping(text: &str) -> Result<Map<String, Value>, LiteralError> {
  let value = match serde_json::from_str::<Value>(text) {
    Ok(v) => v,
    Err(_) => parse_literal(text)?,
  };
  match value {
    Value::Object(map) => Ok(map),
    other => Err(LiteralError::NotAMapping(kind_of(&other))),
  }
}

/// Parse a single Python-style literal value (the whole input must be consumed).
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
  let mut parser = Parser { src: text.chars().collect(), pos: 0, depth: 0 };
  let value = parser.value()?;
  parser.skip_ws();
  if parser.pos < parser.src.len() {
    return Err(LiteralError::Trailing(parser.pos));
  }
  Ok(value)
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "sequence",
    Value::Object(_) => "mapping",
  }
}

struct Parser {
  src: Vec<char>,
  pos: usize,
  depth: usize,
}

impl Parser {
  fn peek(&self) -> Option<char> {
    self.src.get(self.pos).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<char> {
    self.src.get(self.pos + offset).copied()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += 1;
    Some(c)
  }

  fn skip_ws(&mut self) {
    while matches!(self.peek(), Some(c) if c.is_whitespace()) {
      self.pos += 1;
    }
  }

  fn expect(&mut self, want: char) -> Result<(), LiteralError> {
    match self.bump() {
      Some(c) if c == want => Ok(()),
      Some(c) => Err(LiteralError::Unexpected { found: c, at: self.pos - 1 }),
      None => Err(LiteralError::Eof),
    }
  }

  fn value(&mut self) -> Result<Value, LiteralError> {
    self.skip_ws();
    match self.peek() {
      None => Err(LiteralError::Eof),
      Some('{') => self.nested(|p| p.mapping()),
      Some('[') => self.nested(|p| p.sequence('[', ']')),
      Some('(') => self.nested(|p| p.sequence('(', ')')),
      Some('\'' | '"') => self.strings().map(Value::String),
      Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
      Some(c) if c.is_alphabetic() || c == '_' => self.name(),
      Some(c) => Err(LiteralError::Unexpected { found: c, at: self.pos }),
    }
  }

  fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Value, LiteralError>) -> Result<Value, LiteralError> {
    if self.depth >= MAX_DEPTH {
      return Err(LiteralError::TooDeep(self.pos));
    }
    self.depth += 1;
    let value = parse(self);
    self.depth -= 1;
    value
  }

  fn mapping(&mut self) -> Result<Value, LiteralError> {
    self.expect('{')?;
    let mut map = Map::new();
    loop {
      self.skip_ws();
      if self.peek() == Some('}') {
        self.pos += 1;
        break;
      }
      let at = self.pos;
      let key = match self.value()? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return Err(LiteralError::Key(at)),
      };
      self.skip_ws();
      self.expect(':')?;
      let value = self.value()?;
      map.insert(key, value);
      self.skip_ws();
      match self.bump() {
        Some(',') => continue,
        Some('}') => break,
        Some(c) => return Err(LiteralError::Unexpected { found: c, at: self.pos - 1 }),
        None => return Err(LiteralError::Eof),
      }
    }
    Ok(Value::Object(map))
  }

  // Lists and tuples both become arrays; `(x)` without a comma is just `x`.
  fn sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
    self.expect(open)?;
    let mut items = Vec::new();
    let mut saw_comma = false;
    loop {
      self.skip_ws();
      if self.peek() == Some(close) {
        self.pos += 1;
        break;
      }
      items.push(self.value()?);
      self.skip_ws();
      match self.bump() {
        Some(',') => saw_comma = true,
        Some(c) if c == close => break,
        Some(c) => return Err(LiteralError::Unexpected { found: c, at: self.pos - 1 }),
        None => return Err(LiteralError::Eof),
      }
    }
    if open == '(' && items.len() == 1 && !saw_comma {
      return Ok(items.remove(0));
    }
    Ok(Value::Array(items))
  }

  // Adjacent literals concatenate: 'a' "b" == "ab".
  fn strings(&mut self) -> Result<String, LiteralError> {
    let mut out = self.string()?;
    loop {
      let save = self.pos;
      self.skip_ws();
      match self.peek() {
        Some('\'' | '"') => out.push_str(&self.string()?),
        _ => {
          self.pos = save;
          return Ok(out);
        }
      }
    }
  }

  fn string(&mut self) -> Result<String, LiteralError> {
    let quote = self.bump().ok_or(LiteralError::Eof)?;
    let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
    if triple {
      self.pos += 2;
    }
    let mut out = String::new();
    loop {
      let c = self.bump().ok_or(LiteralError::Eof)?;
      if c == quote {
        if !triple {
          return Ok(out);
        }
        if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
          self.pos += 2;
          return Ok(out);
        }
        out.push(c);
        continue;
      }
      match c {
        '\\' => self.escape(&mut out)?,
        '\n' if !triple => return Err(LiteralError::Unexpected { found: c, at: self.pos - 1 }),
        _ => out.push(c),
      }
    }
  }

  fn escape(&mut self, out: &mut String) -> Result<(), LiteralError> {
    let at = self.pos - 1;
    let c = self.bump().ok_or(LiteralError::Eof)?;
    match c {
      '\n' => {}
      '\\' | '\'' | '"' => out.push(c),
      'n' => out.push('\n'),
      't' => out.push('\t'),
      'r' => out.push('\r'),
      'b' => out.push('\u{8}'),
      'f' => out.push('\u{c}'),
      'v' => out.push('\u{b}'),
      'a' => out.push('\u{7}'),
      '0' => out.push('\0'),
      'x' => out.push(self.hex_escape(2, at)?),
      'u' => out.push(self.hex_escape(4, at)?),
      'U' => out.push(self.hex_escape(8, at)?),
      // Unknown escapes are kept verbatim.
      other => {
        out.push('\\');
        out.push(other);
      }
    }
    Ok(())
  }

  fn hex_escape(&mut self, len: usize, at: usize) -> Result<char, LiteralError> {
    let end = self.pos + len;
    if end > self.src.len() {
      return Err(LiteralError::Escape(at));
    }
    let digits: String = self.src[self.pos..end].iter().collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(LiteralError::Escape(at));
    }
    let code = u32::from_str_radix(&digits, 16).map_err(|_| LiteralError::Escape(at))?;
    let ch = char::from_u32(code).ok_or(LiteralError::Escape(at))?;
    self.pos = end;
    Ok(ch)
  }

  fn number(&mut self) -> Result<Value, LiteralError> {
    let start = self.pos;
    if matches!(self.peek(), Some('+' | '-')) {
      self.pos += 1;
    }
    while let Some(c) = self.peek() {
      let after_exponent = self.pos > start && matches!(self.src[self.pos - 1], 'e' | 'E');
      let accept = c.is_ascii_digit()
        || matches!(c, '.' | '_' | 'e' | 'E')
        || (after_exponent && matches!(c, '+' | '-'));
      if !accept {
        break;
      }
      self.pos += 1;
    }
    let raw: String = self.src[start..self.pos].iter().collect();
    let cleaned = raw.replace('_', "");
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    let number = if cleaned.contains(['.', 'e', 'E']) {
      cleaned.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
      cleaned
        .parse::<i64>()
        .map(Number::from)
        .ok()
        .or_else(|| cleaned.parse::<u64>().ok().map(Number::from))
    };
    number.map(Value::Number).ok_or(LiteralError::Number(raw))
  }

  fn name(&mut self) -> Result<Value, LiteralError> {
    let start = self.pos;
    while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
      self.pos += 1;
    }
    let name: String = self.src[start..self.pos].iter().collect();
    match name.as_str() {
      "True" => Ok(Value::Bool(true)),
      "False" => Ok(Value::Bool(false)),
      "None" => Ok(Value::Null),
      _ => Err(LiteralError::UnknownName { name, at: start }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn strict_json_is_accepted_first() {
    let map = parse_mapping(r#"{"a": true, "b": null, "c": [1, 2.5]}"#).unwrap();
    assert_eq!(Value::Object(map), json!({ "a": true, "b": null, "c": [1, 2.5] }));
  }

  #[test]
  fn python_dict_repr_parses() {
    let text = "{'scenario_name': 'Mock Interview', 'questions_for_feedback': ['How did it go?',], \
                'active': True, 'notes': None, 'score': -3, 'ratio': 1e-2,}";
    let map = parse_mapping(text).unwrap();
    assert_eq!(
      Value::Object(map),
      json!({
        "scenario_name": "Mock Interview",
        "questions_for_feedback": ["How did it go?"],
        "active": true,
        "notes": null,
        "score": -3,
        "ratio": 0.01
      })
    );
  }

  #[test]
  fn bare_json_keywords_are_rejected_by_literal_stage() {
    assert_eq!(
      parse_literal("{'a': true}"),
      Err(LiteralError::UnknownName { name: "true".into(), at: 6 })
    );
    assert!(parse_mapping("{'a': null}").is_err());
  }

  #[test]
  fn strings_support_escapes_quotes_and_concatenation() {
    let v = parse_literal(r#"{'q': 'It\'s "fine"\n' 'ok', "u": "é\x41"}"#).unwrap();
    assert_eq!(v, json!({ "q": "It's \"fine\"\nok", "u": "éA" }));

    let v = parse_literal("'''multi\nline'''").unwrap();
    assert_eq!(v, json!("multi\nline"));
  }

  #[test]
  fn tuples_become_arrays_and_parens_group() {
    assert_eq!(parse_literal("(1, 'a')").unwrap(), json!([1, "a"]));
    assert_eq!(parse_literal("(1,)").unwrap(), json!([1]));
    assert_eq!(parse_literal("(1)").unwrap(), json!(1));
    assert_eq!(parse_literal("()").unwrap(), json!([]));
  }

  #[test]
  fn numeric_keys_are_stringified() {
    assert_eq!(parse_literal("{1: 'one'}").unwrap(), json!({ "1": "one" }));
    assert_eq!(parse_literal("{None: 1}"), Err(LiteralError::Key(1)));
  }

  #[test]
  fn non_mapping_values_are_parse_failures() {
    assert_eq!(parse_mapping("[1, 2]"), Err(LiteralError::NotAMapping("sequence")));
    assert_eq!(parse_mapping("'text'"), Err(LiteralError::NotAMapping("string")));
  }

  #[test]
  fn malformed_input_fails() {
    assert_eq!(parse_literal(""), Err(LiteralError::Eof));
    assert_eq!(parse_literal("{'a': 1"), Err(LiteralError::Eof));
    assert_eq!(parse_literal("{'a': 1} extra"), Err(LiteralError::Trailing(9)));
    assert!(parse_literal("{'a' 1}").is_err());
    assert!(parse_literal("{'a': 'unterminated\n'}").is_err());
    assert!(parse_mapping("Sure! Here is your scenario.").is_err());
  }

  #[test]
  fn deep_nesting_is_rejected_without_exhausting_the_stack() {
    // Tokio workers run on 2 MiB stacks.
    let handle = std::thread::Builder::new()
      .stack_size(2 * 1024 * 1024)
      .spawn(|| (parse_mapping(&"[".repeat(200_000)), parse_mapping(&"{'a': (".repeat(50_000))))
      .unwrap();
    let (lists, mixed) = handle.join().unwrap();
    assert!(matches!(lists, Err(LiteralError::TooDeep(_))));
    assert!(matches!(mixed, Err(LiteralError::TooDeep(_))));

    let ok = format!("{{'a': {}1{}}}", "[".repeat(100), "]".repeat(100));
    assert!(parse_mapping(&ok).is_ok());
  }
}
