//! Canonical Hashing
//!
//! Deterministic digests that bind a purchaser identifier to a job payload.
//! The payment service recomputes both digests independently, so the byte
//! layout produced here must never drift:
//!
//! ```text
//! input hash  = SHA256(purchaser_id ";" canonical_json(input))
//! result hash = SHA256(purchaser_id ";" json_string_body(result))
//! ```
//!
//! `canonical_json` sorts object keys by UTF-16 code units, renders numbers
//! in their shortest round-trip form and escapes strings the way a JSON
//! string literal is escaped. Fields that are absent (e.g. `Option::None`
//! skipped during serialization) never reach the canonical form.
//!
//! `json_string_body` escapes the result as the body of a JSON string
//! literal without the surrounding quotes. Non-string results are first
//! rendered as compact JSON text.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Random bytes in a job identifier (14 hex characters)
pub const IDENTIFIER_BYTES: usize = 7;

/// Integers above this magnitude are not exactly representable as f64
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Hashing errors
#[derive(Debug, Error)]
pub enum HashError {
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Hash of `(purchaser_id, input)` over the canonical JSON form
pub fn input_hash<T: Serialize + ?Sized>(purchaser_id: &str, input: &T) -> Result<String, HashError> {
    let value = to_value(input)?;
    let canonical = canonicalize(&value)?;
    Ok(sha256_hex(purchaser_id, &canonical))
}

/// Hash of `(purchaser_id, result)` over the escaped string body
pub fn result_hash<T: Serialize + ?Sized>(purchaser_id: &str, result: &T) -> Result<String, HashError> {
    let value = to_value(result)?;
    let escaped = escape_result(&value)?;
    Ok(sha256_hex(purchaser_id, &escaped))
}

/// Fresh 14-character lowercase hex identifier from the OS RNG
pub fn new_identifier() -> String {
    let mut bytes = [0u8; IDENTIFIER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Render a value in canonical JSON form
pub fn canonicalize(value: &Value) -> Result<String, HashError> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, HashError> {
    serde_json::to_value(value).map_err(|e| HashError::Encoding(e.to_string()))
}

fn sha256_hex(purchaser_id: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(purchaser_id.as_bytes());
    hasher.update(b";");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), HashError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&canonical_number(n)?),
        Value::String(s) => out.push_str(&escape_string(s)?),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&escape_string(key)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn canonical_number(n: &Number) -> Result<String, HashError> {
    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() <= MAX_SAFE_INTEGER {
            return Ok(i.to_string());
        }
    }
    if let Some(u) = n.as_u64() {
        if u <= MAX_SAFE_INTEGER {
            return Ok(u.to_string());
        }
    }

    let f = n
        .as_f64()
        .ok_or_else(|| HashError::Encoding(format!("unrepresentable number: {}", n)))?;
    format_float(f)
}

/// Shortest round-trip rendering with exponent form outside [1e-6, 1e21)
fn format_float(f: f64) -> Result<String, HashError> {
    if !f.is_finite() {
        return Err(HashError::Encoding(format!("non-finite number: {}", f)));
    }
    if f == 0.0 {
        return Ok("0".to_string());
    }

    let magnitude = f.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return Ok(format!("{}", f));
    }

    let exp_form = format!("{:e}", f);
    match exp_form.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            Ok(format!("{}e+{}", mantissa, exponent))
        }
        _ => Ok(exp_form),
    }
}

fn escape_string(s: &str) -> Result<String, HashError> {
    serde_json::to_string(s).map_err(|e| HashError::Encoding(e.to_string()))
}

fn escape_result(value: &Value) -> Result<String, HashError> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).map_err(|e| HashError::Encoding(e.to_string()))?,
    };

    let quoted = escape_string(&text)?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_input_hash_known_vector() {
        let hash = input_hash("user1", &json!({"prompt": "hi"})).unwrap();
        assert_eq!(
            hash,
            "7b6a5bc1d1687ffe3a6368575893f790384cac2bacbcafbce7995896a8208b23"
        );
    }

    #[test]
    fn test_input_hash_nested_vector() {
        let input = json!({"b": {"d": null, "c": true}, "a": [1, 2.5, "x"]});
        assert_eq!(
            canonicalize(&input).unwrap(),
            r#"{"a":[1,2.5,"x"],"b":{"c":true,"d":null}}"#
        );
        assert_eq!(
            input_hash("user1", &input).unwrap(),
            "946d3b7217f639620f51e7323f0e8b256142d2081e01d2dae1548557a8132979"
        );
    }

    #[test]
    fn test_input_hash_deterministic_and_order_independent() {
        let first: Value = serde_json::from_str(r#"{"z": 1, "a": {"y": [3, 2], "b": "s"}}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"a": {"b": "s", "y": [3, 2]}, "z": 1}"#).unwrap();

        let h1 = input_hash("buyer", &first).unwrap();
        let h2 = input_hash("buyer", &second).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1, input_hash("buyer", &first).unwrap());
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // Array order is significant
        let reordered = json!({"z": 1, "a": {"y": [2, 3], "b": "s"}});
        assert_ne!(h1, input_hash("buyer", &reordered).unwrap());
    }

    #[test]
    fn test_input_hash_binds_purchaser() {
        let input = json!({"prompt": "hi"});
        assert_ne!(
            input_hash("user1", &input).unwrap(),
            input_hash("user2", &input).unwrap()
        );
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        #[derive(Serialize)]
        struct Request {
            prompt: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            style: Option<String>,
        }

        let with_absent = Request {
            prompt: "hi".to_string(),
            style: None,
        };
        assert_eq!(
            input_hash("user1", &with_absent).unwrap(),
            input_hash("user1", &json!({"prompt": "hi"})).unwrap()
        );
    }

    #[test]
    fn test_keys_sorted_by_utf16_code_units() {
        // U+1F600 encodes as a surrogate pair (0xD83D ..), which sorts before U+E000
        let input = json!({"\u{e000}": 1, "\u{1f600}": 2});
        assert_eq!(canonicalize(&input).unwrap(), "{\"\u{1f600}\":2,\"\u{e000}\":1}");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(canonicalize(&json!(1.0)).unwrap(), "1");
        assert_eq!(canonicalize(&json!(-0.0)).unwrap(), "0");
        assert_eq!(canonicalize(&json!(0.1)).unwrap(), "0.1");
        assert_eq!(canonicalize(&json!(1e21)).unwrap(), "1e+21");
        assert_eq!(canonicalize(&json!(1.5e-7)).unwrap(), "1.5e-7");
        assert_eq!(canonicalize(&json!(-42)).unwrap(), "-42");
        assert_eq!(canonicalize(&json!(u64::MAX)).unwrap(), "18446744073709552000");
    }

    #[test]
    fn test_string_escaping() {
        let input = json!("line\nquote\"tab\t\u{1}é");
        assert_eq!(
            canonicalize(&input).unwrap(),
            "\"line\\nquote\\\"tab\\t\\u0001é\""
        );
    }

    #[test]
    fn test_result_hash_known_vectors() {
        assert_eq!(
            result_hash("user1", "hello").unwrap(),
            "d1cd54ac7e68368c4d616b2e71afadc14a2144a55d0df57d2344d42904d84821"
        );
        assert_eq!(
            result_hash("user1", &json!({"text": "done"})).unwrap(),
            "b7eb07dda76c53d937d1eab6726607919d3c159dde44c7e08f68255a1d420ba6"
        );
    }

    #[test]
    fn test_result_hash_differs_from_input_hash() {
        let payload = json!({"text": "line one\nsaid \"hi\" ünïcødé ✓"});

        let input = input_hash("user1", &payload).unwrap();
        let result = result_hash("user1", &payload).unwrap();
        assert_ne!(input, result);

        // Plain strings escape differently too
        let text = json!("a\nb\"c ü");
        assert_ne!(
            input_hash("user1", &text).unwrap(),
            result_hash("user1", &text).unwrap()
        );
    }

    #[test]
    fn test_escape_result_has_no_quotes() {
        assert_eq!(escape_result(&json!("a\"b\nc")).unwrap(), "a\\\"b\\nc");
        assert_eq!(escape_result(&json!({"k": 1})).unwrap(), "{\\\"k\\\":1}");
    }

    #[test]
    fn test_unserializable_input_is_encoding_error() {
        let mut map = HashMap::new();
        map.insert(vec![1u8, 2], "value");

        let result = input_hash("user1", &map);
        assert!(matches!(result, Err(HashError::Encoding(_))));
    }

    #[test]
    fn test_new_identifier_format() {
        for _ in 0..100 {
            let id = new_identifier();
            assert_eq!(id.len(), 14);
            assert!(id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }
    }

    #[test]
    fn test_new_identifier_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_identifier()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
