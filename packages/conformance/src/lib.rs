//! Shared helpers for the shapecode conformance test suite.
//!
//! Provides [`spawn_mock_api`]: an in-process `axum` stand-in for the
//! Shapeways API, bound to an ephemeral port on `127.0.0.1`. The mock
//! verifies every request's OAuth 1.0a signature with the library's own
//! signer, records what it received, and answers in the same mix of
//! encodings the real service uses (JSON, query string, XML error).
//!
//! The server runs on its own thread with its own `tokio` runtime so that
//! tests can drive the blocking client from plain `#[test]` functions.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use shapecode::encoding::{decode, encode};
use shapecode::signing::{sign, signature_base_string};
use shapecode::{AccessToken, ClientConfig, ConsumerCredentials, HttpVerb};

pub const CONSUMER_KEY: &str = "conformance-key";
pub const CONSUMER_SECRET: &str = "conformance-secret";

/// Access token the mock accepts for ordinary API calls.
pub const ACCESS_TOKEN: (&str, &str) = ("tok", "tok-secret");
/// Request token handed out by `oauth1/request_token`.
pub const REQUEST_TOKEN: (&str, &str) = ("req", "req-secret");
/// Access token handed out by `oauth1/access_token`.
pub const EXCHANGED_TOKEN: (&str, &str) = ("acc", "acc-secret");

/// `printers/{printerId}` with this id answers after [`SLOW_DELAY`].
pub const SLOW_PRINTER: &str = "slow";
pub const SLOW_DELAY: Duration = Duration::from_millis(1500);

/// One request as the mock received it.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    /// Path plus query, as sent.
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Whether the OAuth signature verified.
    pub signature_valid: bool,
}

impl CapturedRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Handle to a running mock.
#[derive(Debug, Clone)]
pub struct MockApi {
    /// e.g. `http://127.0.0.1:51234`
    pub base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockApi {
    /// Client configuration pointing at this mock.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: format!("{}/{{path}}/v1", self.base_url),
            ..ClientConfig::default()
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<CapturedRequest> {
        self.requests().pop()
    }
}

#[derive(Clone)]
struct MockState {
    base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

/// Start the mock and return a handle once it is accepting connections.
///
/// # Panics
///
/// Panics if the runtime cannot be built or the listener cannot be bound.
pub fn spawn_mock_api() -> MockApi {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (ready_tx, ready_rx) = mpsc::channel();

    let shared = Arc::clone(&requests);
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build mock runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind ephemeral port");
            let addr = listener.local_addr().expect("get local addr");
            let base_url = format!("http://{addr}");
            ready_tx.send(base_url.clone()).expect("report mock address");

            let state = MockState {
                base_url,
                requests: shared,
            };
            let router = Router::new().fallback(handle).with_state(state);
            axum::serve(listener, router).await.expect("mock api error");
        });
    });

    let base_url = ready_rx.recv().expect("mock api did not start");
    MockApi { base_url, requests }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn handle(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_map: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let signature_valid = verify_signature(&state.base_url, &method, &uri, &header_map, &body);

    state
        .requests
        .lock()
        .expect("request log poisoned")
        .push(CapturedRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            headers: header_map,
            body: body.to_vec(),
            signature_valid,
        });

    if !signature_valid {
        return xml_error(StatusCode::UNAUTHORIZED, &method, &uri, "Invalid signature");
    }

    let path = uri.path().trim_end_matches('/');
    let path = path.strip_suffix("/v1").unwrap_or(path);
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("GET", ["api"]) => json(StatusCode::OK, r#"{"result":"success","rateLimit":{"limit":100}}"#),
        ("POST", ["oauth1", "request_token"]) => form(&format!(
            "oauth_token={}&oauth_token_secret={}&authentication_url={}",
            REQUEST_TOKEN.0,
            REQUEST_TOKEN.1,
            encode(&format!("http://mock.example/login?oauth_token={}", REQUEST_TOKEN.0)),
        )),
        ("POST", ["oauth1", "access_token"]) => form(&format!(
            "oauth_token={}&oauth_token_secret={}",
            EXCHANGED_TOKEN.0, EXCHANGED_TOKEN.1
        )),
        ("GET", ["materials"]) => json(
            StatusCode::OK,
            r#"{"result":"success","materials":{"6":{"title":"White Strong & Flexible"}}}"#,
        ),
        ("GET", ["materials", "6"]) => json(
            StatusCode::OK,
            r#"{"result":"success","materialId":6,"title":"White Strong & Flexible"}"#,
        ),
        ("GET", ["materials", _]) => {
            xml_error(StatusCode::NOT_FOUND, &method, &uri, "Material not found")
        }
        ("GET", ["models"]) => json(StatusCode::OK, r#"{"result":"success","models":[]}"#),
        ("POST", ["models"]) => json(StatusCode::OK, r#"{"result":"success","modelId":1001}"#),
        ("GET" | "PUT", ["models", id, "info"]) => json(
            StatusCode::OK,
            &format!(r#"{{"result":"success","modelId":{id}}}"#),
        ),
        ("DELETE", ["models", _]) => json(StatusCode::OK, r#"{"result":"success"}"#),
        ("GET", ["orders", "cart"]) => json(StatusCode::OK, "[]"),
        ("GET", ["printers", SLOW_PRINTER]) => {
            tokio::time::sleep(SLOW_DELAY).await;
            json(StatusCode::OK, r#"{"result":"success"}"#)
        }
        _ => xml_error(StatusCode::NOT_FOUND, &method, &uri, "Unknown method"),
    }
}

fn json(status: StatusCode, body: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn form(body: &str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-www-form-urlencoded")],
        body.to_string(),
    )
        .into_response()
}

fn xml_error(status: StatusCode, method: &Method, uri: &Uri, error: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<response><request>{method} {}</request><error>{error}</error></response>",
        uri.path()
    );
    (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

// ---------------------------------------------------------------------------
// Signature verification
// ---------------------------------------------------------------------------

fn token_secret(token: &str) -> Option<&'static str> {
    [ACCESS_TOKEN, REQUEST_TOKEN, EXCHANGED_TOKEN]
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, s)| *s)
}

/// Rebuild the base string the way a server does and compare signatures.
fn verify_signature(
    base_url: &str,
    method: &Method,
    uri: &Uri,
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> bool {
    let Some(fields) = headers
        .get("authorization")
        .and_then(|h| h.strip_prefix("OAuth "))
        .map(parse_authorization)
    else {
        return false;
    };
    if fields.get("oauth_consumer_key").map(String::as_str) != Some(CONSUMER_KEY) {
        return false;
    }
    let Some(signature) = fields.get("oauth_signature") else {
        return false;
    };

    let token = match fields.get("oauth_token") {
        Some(token) => match token_secret(token) {
            Some(secret) => Some(AccessToken::new(token.clone(), secret)),
            None => return false,
        },
        None => None,
    };

    let mut pairs: Vec<(String, String)> = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "oauth_signature")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(query) = uri.query() {
        pairs.extend(parse_pairs(query));
    }
    let is_form = headers
        .get("content-type")
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        pairs.extend(parse_pairs(&String::from_utf8_lossy(body)));
    }

    let verb = match *method {
        Method::GET => HttpVerb::Get,
        Method::POST => HttpVerb::Post,
        Method::PUT => HttpVerb::Put,
        Method::DELETE => HttpVerb::Delete,
        _ => return false,
    };
    let base = signature_base_string(verb, &format!("{base_url}{}", uri.path()), &pairs);
    let consumer = ConsumerCredentials::new(CONSUMER_KEY, CONSUMER_SECRET);
    sign(&consumer, token.as_ref(), &base).is_ok_and(|expected| &expected == signature)
}

fn parse_authorization(header: &str) -> BTreeMap<String, String> {
    header
        .split(", ")
        .filter_map(|field| field.split_once('='))
        .map(|(k, v)| (k.to_string(), decode(v.trim_matches('"'))))
        .collect()
}

fn parse_pairs(text: &str) -> Vec<(String, String)> {
    text.split('&')
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(s), String::new()),
        })
        .collect()
}
