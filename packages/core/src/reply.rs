//! Reply normalization.
//!
//! The service answers in one of three encodings: JSON (the normal case), a
//! minimal XML document (some errors), or an `application/x-www-form-urlencoded`
//! query string (the OAuth token endpoints). [`parse_reply`] turns any of
//! them into one canonical [`Reply`]; [`ApiReply::render`] re-expresses it in
//! the caller's [`ReturnFormat`].
//!
//! Decoding never fails. The fallback order is JSON → XML error → query
//! string, and an empty body (or `[]`) yields an empty map.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::encoding::decode;

const HEADER_BREAK: &str = "\r\n\r\n";
const STATUS_FIELD: &str = "httpstatus";
const DEFAULT_STATUS: u16 = 500;

static STATUS_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP/\d(?:\.\d)? (\d{3})").expect("static regex is valid"));
static XML_REQUEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<request>(.*)</request>").expect("static regex is valid"));
static XML_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<error>(.*)</error>").expect("static regex is valid"));

// ---------------------------------------------------------------------------
// Output representation
// ---------------------------------------------------------------------------

/// How replies are handed back to the caller. Fixed per client instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnFormat {
    /// A [`Reply`] with typed accessors and `httpstatus`.
    #[default]
    Object,
    /// A plain JSON map with an `httpstatus` entry.
    Map,
    /// The decoded body as JSON text; status is returned alongside.
    Json,
}

impl FromStr for ReturnFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "object" => Ok(ReturnFormat::Object),
            "map" | "array" => Ok(ReturnFormat::Map),
            "json" => Ok(ReturnFormat::Json),
            other => Err(format!(
                "unknown return format {other:?}; expected object, map or json"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// The canonical decoded reply.
///
/// Serializes as the same object [`Reply::into_map`] builds: the fields with
/// `httpstatus` set to the HTTP status, whatever the body said.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    fields: Map<String, Value>,
    httpstatus: u16,
    headers: BTreeMap<String, String>,
}

impl Reply {
    pub fn new(fields: Map<String, Value>, status: u16) -> Self {
        Self {
            fields,
            httpstatus: status,
            headers: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Shorthand for a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn status(&self) -> u16 {
        self.httpstatus
    }

    /// Response headers, first occurrence of each name.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// `true` when the service reported `"result": "success"`.
    pub fn is_success(&self) -> bool {
        self.get_str("result") == Some("success")
    }

    /// The fields plus an `httpstatus` entry.
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = self.fields;
        map.insert(STATUS_FIELD.into(), Value::from(self.httpstatus));
        map
    }

    /// Deserialize the fields (plus `httpstatus`) into a caller type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.clone().into_map()))
    }
}

impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields: Vec<_> = self
            .fields
            .iter()
            .filter(|(key, _)| key.as_str() != STATUS_FIELD)
            .collect();
        let mut map = serializer.serialize_map(Some(fields.len() + 1))?;
        for (key, value) in fields {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(STATUS_FIELD, &self.httpstatus)?;
        map.end()
    }
}

/// A reply rendered in one of the three [`ReturnFormat`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiReply {
    Object(Reply),
    Map(Map<String, Value>),
    /// The JSON text carries no status; it travels in `status`.
    Json { body: String, status: u16 },
}

impl ApiReply {
    pub fn render(reply: Reply, format: ReturnFormat) -> Self {
        match format {
            ReturnFormat::Object => ApiReply::Object(reply),
            ReturnFormat::Map => ApiReply::Map(reply.into_map()),
            ReturnFormat::Json => {
                let status = reply.httpstatus;
                let body = Value::Object(reply.fields).to_string();
                ApiReply::Json { body, status }
            }
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiReply::Object(reply) => reply.status(),
            ApiReply::Map(map) => map
                .get(STATUS_FIELD)
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(DEFAULT_STATUS),
            ApiReply::Json { status, .. } => *status,
        }
    }

    /// The reply as a JSON value, `httpstatus` included for the structural
    /// representations.
    pub fn to_value(&self) -> Value {
        match self {
            ApiReply::Object(reply) => Value::Object(reply.clone().into_map()),
            ApiReply::Map(map) => Value::Object(map.clone()),
            ApiReply::Json { body, .. } => {
                serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Decode raw transport bytes (status line, headers, blank line, body).
///
/// `status` wins over the status line when given; otherwise the status line
/// is parsed, defaulting to 500.
pub fn parse_reply(raw: &[u8], status: Option<u16>) -> Reply {
    let text = String::from_utf8_lossy(raw);
    let (mut head, mut body) = split_head(&text);

    if is_proxy_preamble(head) {
        (head, body) = split_head(body);
    }

    let (status_line, headers) = parse_headers(head);
    Reply {
        fields: decode_body(body),
        httpstatus: status.or(status_line).unwrap_or(DEFAULT_STATUS),
        headers,
    }
}

/// Decode a reply body into a canonical map.
pub fn decode_body(body: &str) -> Map<String, Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Map::new();
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return canonicalize(value);
    }
    if starts_with_ignore_case(trimmed, "<?xml") {
        return decode_xml_error(trimmed);
    }
    decode_query(trimmed)
}

/// Bring any JSON value into keyed form.
///
/// Objects are returned unchanged, arrays become index-keyed maps, `null`
/// becomes empty and other scalars are wrapped under `value`.
pub fn canonicalize(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Value::Null => Map::new(),
        scalar => {
            let mut map = Map::new();
            map.insert("value".into(), scalar);
            map
        }
    }
}

fn split_head(text: &str) -> (&str, &str) {
    text.split_once(HEADER_BREAK).unwrap_or((text, ""))
}

fn is_proxy_preamble(head: &str) -> bool {
    let lower = head.trim_start().to_ascii_lowercase();
    lower.starts_with("http/1.0 200 connection established")
        || lower.starts_with("http/1.1 200 connection established")
}

fn parse_headers(head: &str) -> (Option<u16>, BTreeMap<String, String>) {
    let mut status = None;
    let mut headers = BTreeMap::new();
    for (i, line) in head.split("\r\n").enumerate() {
        if i == 0 {
            if let Some(caps) = STATUS_LINE_RE.captures(line) {
                status = caps[1].parse().ok();
                continue;
            }
        }
        if let Some((name, value)) = line.split_once(':') {
            headers
                .entry(name.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    (status, headers)
}

fn decode_xml_error(body: &str) -> Map<String, Value> {
    let element = |re: &Regex| {
        re.captures(body)
            .map(|caps| decode_entities(&caps[1]))
            .unwrap_or_default()
    };
    let mut map = Map::new();
    map.insert("request".into(), Value::String(element(&XML_REQUEST_RE)));
    map.insert("error".into(), Value::String(element(&XML_ERROR_RE)));
    map
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Decode a query-string body.
///
/// `authentication_url` is forced to `https://`. The token endpoints embed
/// the request token inside another value (e.g. inside the authentication
/// URL) instead of returning it as its own field, so any value containing
/// `oauth_token=` also exposes the text after it as `oauth_token`. This is
/// a heuristic matching observed server behaviour, not part of OAuth.
fn decode_query(body: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for element in body.split('&').filter(|e| !e.is_empty()) {
        let Some((key, raw)) = element.split_once('=') else {
            map.insert("message".into(), Value::String(element.to_string()));
            continue;
        };
        let mut value = decode(raw);
        if key == "authentication_url" {
            if let Some(rest) = value.strip_prefix("http://") {
                value = format!("https://{rest}");
            }
        }
        let embedded_token = value
            .find("oauth_token=")
            .map(|pos| value[pos + "oauth_token=".len()..].to_string());
        map.insert(key.to_string(), Value::String(value));
        if let Some(token) = embedded_token {
            map.insert("oauth_token".into(), Value::String(token));
        }
    }
    map
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
