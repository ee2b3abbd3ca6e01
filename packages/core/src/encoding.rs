//! Canonical percent-encoding for OAuth signing and request bodies.
//!
//! Only the RFC 3986 unreserved set (`A-Z a-z 0-9 - . _ ~`) passes through
//! unchanged. Every other byte, including `! * ' ( )` and space, is written
//! as `%XX` with uppercase hex. Space is never encoded as `+`.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// A parameter set: string keys, scalar or container values.
pub type Params = Map<String, Value>;

/// Percent-encode a single scalar string.
pub fn encode(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Percent-decode a string. Does not treat `+` as space.
///
/// Invalid UTF-8 in the decoded bytes is replaced lossily.
pub fn decode(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned(),
    }
}

/// Render a scalar JSON value as the string that goes on the wire.
///
/// Containers render as an empty string; use [`flatten_pairs`] for them.
pub fn scalar_to_string(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Number(n) => Cow::Owned(n.to_string()),
        Value::Bool(true) => Cow::Borrowed("true"),
        Value::Bool(false) => Cow::Borrowed("false"),
        Value::Null | Value::Array(_) | Value::Object(_) => Cow::Borrowed(""),
    }
}

/// Replace `null` and boolean values with their string spellings.
///
/// Applied once to caller parameters so that signing, query strings and
/// JSON bodies all see the same textual value.
pub fn stringify_scalars(params: &mut Params) {
    for value in params.values_mut() {
        match value {
            Value::Null => *value = Value::String("null".into()),
            Value::Bool(b) => *value = Value::String(if *b { "true" } else { "false" }.into()),
            _ => {}
        }
    }
}

/// Flatten a parameter map into raw `(key, value)` pairs.
///
/// Nested containers recurse with bracket keys, the way HTML forms submit
/// them: `{"tags": ["a", "b"]}` becomes `tags[0]=a`, `tags[1]=b`. The
/// result is sorted byte-wise by key, then by value.
pub fn flatten_pairs(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        push_pairs(key.clone(), value, &mut pairs);
    }
    pairs.sort();
    pairs
}

fn push_pairs(key: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                push_pairs(format!("{key}[{i}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                push_pairs(format!("{key}[{sub}]"), item, out);
            }
        }
        scalar => out.push((key, scalar_to_string(scalar).into_owned())),
    }
}

/// Join pairs as `k=v&k=v`, encoding both sides.
pub fn join_encoded(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build a query string or form body from a parameter map.
pub fn build_query(params: &Params) -> String {
    join_encoded(&flatten_pairs(params))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
