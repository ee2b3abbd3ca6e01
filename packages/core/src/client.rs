//! The client: resolve → sign → send → normalize.
//!
//! A [`ShapecodeClient`] owns its consumer credentials, an optional access
//! token, its configuration and a [`Transport`]. Every call goes through
//! [`ShapecodeClient::prepare`], which produces the signed
//! [`TransportRequest`] without touching the network, so the request shape
//! is testable on its own.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, EnvCredentials};
use crate::encoding::{flatten_pairs, join_encoded, stringify_scalars, Params};
use crate::error::ClientError;
use crate::inliner::inline_files;
use crate::registry::{HttpVerb, Registry};
use crate::reply::{parse_reply, ApiReply, Reply, ReturnFormat};
use crate::resolver::resolve;
use crate::signing::{authorization_header, AccessToken, ConsumerCredentials, OAuthNonce};
use crate::transport::{HttpTransport, Transport, TransportRequest};

const REQUEST_TOKEN_TEMPLATE: &str = "oauth1/request_token";

/// Client for the path-templated, OAuth 1.0a signed REST API.
///
/// Operations are named by identifier (`models_MODELID_info`) and take a
/// JSON parameter map; see [`resolver`](crate::resolver) for the naming
/// rules.
#[derive(Debug)]
pub struct ShapecodeClient<T: Transport = HttpTransport> {
    consumer: ConsumerCredentials,
    token: Option<AccessToken>,
    config: ClientConfig,
    transport: T,
    nonce_source: fn() -> OAuthNonce,
}

impl ShapecodeClient<HttpTransport> {
    /// Build a client with the production HTTP transport.
    ///
    /// # Errors
    ///
    /// Propagates [`HttpTransport::new`] failures (unreadable CA bundle,
    /// client construction).
    pub fn new(consumer: ConsumerCredentials, config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.transport_settings())?;
        Ok(Self::with_transport(consumer, config, transport))
    }

    /// Build a client from [`ClientConfig::from_env`] and
    /// [`EnvCredentials::from_env`], with the access token set when present.
    pub fn from_env() -> Result<Self, ClientError> {
        let config = ClientConfig::from_env()?;
        let credentials = EnvCredentials::from_env()?;
        let mut client = Self::new(credentials.consumer, config)?;
        client.token = credentials.token;
        Ok(client)
    }
}

impl<T: Transport> ShapecodeClient<T> {
    pub fn with_transport(consumer: ConsumerCredentials, config: ClientConfig, transport: T) -> Self {
        Self {
            consumer,
            token: None,
            config,
            transport,
            nonce_source: OAuthNonce::fresh,
        }
    }

    /// Replace the nonce/timestamp generator (replayable fixtures).
    pub fn with_nonce_source(mut self, source: fn() -> OAuthNonce) -> Self {
        self.nonce_source = source;
        self
    }

    pub fn set_token(&mut self, token: AccessToken) {
        self.token = Some(token);
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn return_format(&self) -> ReturnFormat {
        self.config.return_format
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Library version.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Every callable templated path, grouped by verb.
    pub fn api_methods() -> BTreeMap<HttpVerb, Vec<&'static str>> {
        Registry::global().api_methods()
    }

    /// Perform one operation and render the reply in the configured format.
    pub fn call(&self, identifier: &str, params: Params) -> Result<ApiReply, ClientError> {
        let reply = self.call_reply(identifier, params)?;
        Ok(ApiReply::render(reply, self.config.return_format))
    }

    /// Perform one operation and return the canonical [`Reply`], whatever
    /// the configured format.
    pub fn call_reply(&self, identifier: &str, params: Params) -> Result<Reply, ClientError> {
        let request = self.prepare(identifier, params)?;
        let raw = self.transport.send(&request).map_err(|e| {
            if let ClientError::CertificateValidation { failure, .. } = &e {
                warn!("certificate validation failed for {}: {failure}", request.url);
            }
            e
        })?;
        let reply = parse_reply(&raw.bytes, raw.status);
        info!("{identifier}: {} {} -> {}", request.verb, request.url, reply.status());
        Ok(reply)
    }

    /// Build the signed request for an operation without sending it.
    ///
    /// # Errors
    ///
    /// - Resolution errors ([`ClientError::MissingPathParameter`],
    ///   [`ClientError::UnknownOperation`]).
    /// - [`ClientError::Configuration`] when a non-token operation is
    ///   called without an access token.
    /// - [`ClientError::Signing`] for unusable consumer credentials.
    pub fn prepare(&self, identifier: &str, mut params: Params) -> Result<TransportRequest, ClientError> {
        stringify_scalars(&mut params);
        let mut call = resolve(Registry::global(), identifier, params)?;
        let token_operation = call.descriptor.is_token_acquisition();

        // A new request token is always negotiated without a previous token.
        let token = if call.template() == REQUEST_TOKEN_TEMPLATE {
            None
        } else {
            self.token.as_ref()
        };
        if token.is_none() && !token_operation {
            return Err(ClientError::Configuration(
                "to call this API, the OAuth access token must be set".into(),
            ));
        }

        let verb = call.verb;
        let base_url = self.config.endpoint_url(&call.path);
        let nonce = (self.nonce_source)();

        let request = if verb == HttpVerb::Get {
            let pairs = flatten_pairs(&call.params);
            let authorization =
                authorization_header(&self.consumer, token, verb, &base_url, &pairs, &nonce)?;
            let url = if pairs.is_empty() {
                base_url
            } else {
                format!("{base_url}?{}", join_encoded(&pairs))
            };
            TransportRequest {
                verb,
                url,
                headers: vec![("Authorization".into(), authorization)],
                body: None,
            }
        } else if token_operation {
            let pairs = flatten_pairs(&call.params);
            let authorization =
                authorization_header(&self.consumer, token, verb, &base_url, &pairs, &nonce)?;
            with_body(
                verb,
                base_url,
                authorization,
                "application/x-www-form-urlencoded",
                join_encoded(&pairs).into_bytes(),
            )
        } else {
            let inlined = inline_files(call.template(), &mut call.params);
            if inlined > 0 {
                debug!("inlined {inlined} file(s) into {identifier}");
            }
            let authorization =
                authorization_header(&self.consumer, token, verb, &base_url, &[], &nonce)?;
            let body = serde_json::to_vec(&Value::Object(call.params))
                .map_err(|e| ClientError::Configuration(format!("cannot encode body: {e}")))?;
            with_body(verb, base_url, authorization, "application/json", body)
        };

        debug!(
            "prepared {identifier} as {} {} ({} body bytes)",
            request.verb,
            request.url,
            request.body.as_ref().map_or(0, Vec::len)
        );
        Ok(request)
    }

    /// Obtain a request token and keep it as the current token.
    ///
    /// The reply carries `oauth_token`, `oauth_token_secret` and the
    /// `authentication_url` the user must visit.
    pub fn acquire_request_token(&mut self, callback: &str) -> Result<Reply, ClientError> {
        self.clear_token();
        let mut params = Params::new();
        params.insert("oauth_callback".into(), Value::String(callback.into()));
        let reply = self.call_reply("oauth1_requestToken", params)?;
        self.adopt_token(&reply);
        Ok(reply)
    }

    /// Exchange the current request token and the user's verifier for an
    /// access token, which replaces the current token on success.
    pub fn acquire_access_token(&mut self, verifier: &str) -> Result<Reply, ClientError> {
        if self.token.is_none() {
            return Err(ClientError::Configuration(
                "a request token must be set before exchanging it for an access token".into(),
            ));
        }
        let mut params = Params::new();
        params.insert("oauth_verifier".into(), Value::String(verifier.into()));
        let reply = self.call_reply("oauth1_accessToken", params)?;
        self.adopt_token(&reply);
        Ok(reply)
    }

    /// Upload a model file with the standard rights and terms flags.
    pub fn upload_model(&self, upload: &ModelUpload) -> Result<ApiReply, ClientError> {
        self.call("models", upload.to_params()?)
    }

    fn adopt_token(&mut self, reply: &Reply) {
        match (reply.get_str("oauth_token"), reply.get_str("oauth_token_secret")) {
            (Some(token), Some(secret)) => {
                debug!("adopted new token from {} reply", reply.status());
                self.token = Some(AccessToken::new(token, secret));
            }
            _ => debug!("reply carried no token pair (status {})", reply.status()),
        }
    }
}

fn with_body(
    verb: HttpVerb,
    url: String,
    authorization: String,
    content_type: &str,
    body: Vec<u8>,
) -> TransportRequest {
    TransportRequest {
        verb,
        url,
        headers: vec![
            ("Authorization".into(), authorization),
            ("Content-Type".into(), content_type.into()),
            ("Content-Length".into(), body.len().to_string()),
        ],
        body: Some(body),
    }
}

// ---------------------------------------------------------------------------
// Model upload
// ---------------------------------------------------------------------------

/// Default material for uploads that do not name one.
pub const DEFAULT_MATERIAL_ID: u64 = 6;

/// Input for [`ShapecodeClient::upload_model`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelUpload {
    pub file: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub default_material_id: u64,
}

impl ModelUpload {
    pub fn new(file: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            is_public: false,
            default_material_id: DEFAULT_MATERIAL_ID,
        }
    }

    /// Split a comma-separated tag list, trimming each tag.
    pub fn with_tag_list(mut self, tags: &str) -> Self {
        self.tags = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        self
    }

    fn to_params(&self) -> Result<Params, ClientError> {
        let file_name = Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ClientError::Configuration(format!("{:?} does not name a file", self.file))
            })?;
        let mut params = Params::new();
        params.insert("file".into(), json!(self.file));
        params.insert("fileName".into(), json!(file_name));
        params.insert("hasRightsToModel".into(), json!(1));
        params.insert("acceptTermsAndConditions".into(), json!(1));
        params.insert("title".into(), json!(self.title));
        params.insert("description".into(), json!(self.description));
        params.insert("isPublic".into(), json!(u8::from(self.is_public)));
        params.insert("isForSale".into(), json!(0));
        params.insert("isDownloadable".into(), json!(0));
        params.insert("tags".into(), json!(self.tags));
        params.insert("materials".into(), json!({}));
        params.insert("defaultMaterialId".into(), json!(self.default_material_id));
        Ok(params)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use tempfile::NamedTempFile;

    use crate::signing::signature_base_string;
    use crate::transport::RawResponse;

    /// Records every request and answers with a canned response.
    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<TransportRequest>>>,
        response: Arc<Mutex<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn answering(raw: &str) -> Self {
            let t = Self::default();
            *t.response.lock().unwrap() = raw.as_bytes().to_vec();
            t
        }

        fn last(&self) -> TransportRequest {
            self.sent.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, request: &TransportRequest) -> Result<RawResponse, ClientError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(RawResponse {
                bytes: self.response.lock().unwrap().clone(),
                status: None,
            })
        }
    }

    fn fixed_nonce() -> OAuthNonce {
        OAuthNonce::new("abcdef12", 1400000000)
    }

    fn client(transport: RecordingTransport) -> ShapecodeClient<RecordingTransport> {
        ShapecodeClient::with_transport(
            ConsumerCredentials::new("ck", "cs"),
            ClientConfig::default(),
            transport,
        )
        .with_nonce_source(fixed_nonce)
    }

    fn authed(transport: RecordingTransport) -> ShapecodeClient<RecordingTransport> {
        let mut c = client(transport);
        c.set_token(AccessToken::new("tok", "ts"));
        c
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    const OK_JSON: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"result\":\"success\"}";

    #[test]
    fn non_token_call_without_token_is_rejected() {
        let transport = RecordingTransport::answering(OK_JSON);
        let c = client(transport.clone());
        let err = c.call("materials", Params::new()).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn get_appends_sorted_query() {
        let transport = RecordingTransport::answering(OK_JSON);
        let c = authed(transport.clone());
        c.call("models", params(json!({"page": 2, "activeOnly": true})))
            .unwrap();
        let sent = transport.last();
        assert_eq!(sent.verb, HttpVerb::Get);
        assert_eq!(
            sent.url,
            "https://api.shapeways.com/models/v1?activeOnly=true&page=2"
        );
        assert!(sent.body.is_none());
        assert!(sent.header("Authorization").unwrap().contains("oauth_token=\"tok\""));
    }

    #[test]
    fn api_operation_has_trailing_slash() {
        let transport = RecordingTransport::answering(OK_JSON);
        authed(transport.clone()).call("api", Params::new()).unwrap();
        assert_eq!(transport.last().url, "https://api.shapeways.com/api/v1/");
    }

    #[test]
    fn get_signature_covers_query_pairs() {
        let transport = RecordingTransport::answering(OK_JSON);
        let c = authed(transport.clone());
        c.call("materials_MATERIALID", params(json!({"materialId": 6, "x": "a b"})))
            .unwrap();
        let sent = transport.last();
        assert_eq!(sent.url, "https://api.shapeways.com/materials/6/v1?x=a%20b");

        let expected = authorization_header(
            &ConsumerCredentials::new("ck", "cs"),
            Some(&AccessToken::new("tok", "ts")),
            HttpVerb::Get,
            &sent.url,
            &[],
            &fixed_nonce(),
        )
        .unwrap();
        assert_eq!(sent.header("Authorization"), Some(expected.as_str()));
    }

    #[test]
    fn request_token_is_form_encoded_and_signed_without_token() {
        let transport = RecordingTransport::answering(
            "HTTP/1.1 200 OK\r\n\r\noauth_token=rt&oauth_token_secret=rs\
             &authentication_url=http%3A%2F%2Fx.example%2Flogin%3Foauth_token%3Drt",
        );
        let mut c = authed(transport.clone());
        let reply = c.acquire_request_token("oob").unwrap();

        let sent = transport.last();
        assert_eq!(sent.verb, HttpVerb::Post);
        assert_eq!(sent.url, "https://api.shapeways.com/oauth1/request_token/v1");
        assert_eq!(sent.body.as_deref(), Some(&b"oauth_callback=oob"[..]));
        assert_eq!(
            sent.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            sent.header("Authorization"),
            Some(
                "OAuth oauth_consumer_key=\"ck\", oauth_nonce=\"abcdef12\", \
                 oauth_signature=\"TYhf5e%2FOaf6RLFwEmjnH6WhP88M%3D\", \
                 oauth_signature_method=\"HMAC-SHA1\", oauth_timestamp=\"1400000000\", \
                 oauth_version=\"1.0\""
            )
        );

        assert_eq!(reply.get_str("authentication_url"), Some("https://x.example/login?oauth_token=rt"));
        assert_eq!(c.token().map(AccessToken::token), Some("rt"));
    }

    #[test]
    fn access_token_exchange_uses_request_token() {
        let transport = RecordingTransport::answering(
            "HTTP/1.1 200 OK\r\n\r\noauth_token=at&oauth_token_secret=as",
        );
        let mut c = client(transport.clone());
        assert!(matches!(
            c.acquire_access_token("v"),
            Err(ClientError::Configuration(_))
        ));

        c.set_token(AccessToken::new("rt", "rs"));
        c.acquire_access_token("1234").unwrap();
        let sent = transport.last();
        assert_eq!(sent.url, "https://api.shapeways.com/oauth1/access_token/v1");
        assert_eq!(sent.body.as_deref(), Some(&b"oauth_verifier=1234"[..]));
        assert!(sent.header("Authorization").unwrap().contains("oauth_token=\"rt\""));
        assert_eq!(c.token().map(AccessToken::token), Some("at"));
    }

    #[test]
    fn json_body_is_not_signed() {
        let transport = RecordingTransport::answering(OK_JSON);
        let c = authed(transport.clone());
        c.call("price", params(json!({"volume": 1.5, "area": 3})))
            .unwrap();
        let sent = transport.last();
        let body = sent.body.clone().unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"volume": 1.5, "area": 3})
        );
        assert_eq!(sent.header("Content-Type"), Some("application/json"));
        assert_eq!(sent.header("Content-Length"), Some(body.len().to_string().as_str()));

        let unsigned_body = authorization_header(
            &ConsumerCredentials::new("ck", "cs"),
            Some(&AccessToken::new("tok", "ts")),
            HttpVerb::Post,
            "https://api.shapeways.com/price/v1",
            &[],
            &fixed_nonce(),
        )
        .unwrap();
        assert_eq!(sent.header("Authorization"), Some(unsigned_body.as_str()));
    }

    #[test]
    fn scalars_are_stringified_before_sending() {
        let transport = RecordingTransport::answering(OK_JSON);
        let c = authed(transport.clone());
        c.call(
            "models_MODELID_info",
            params(json!({"modelId": 3, "isPublic": false, "note": null})),
        )
        .unwrap();
        let sent = transport.last();
        assert_eq!(sent.verb, HttpVerb::Put);
        assert_eq!(
            serde_json::from_slice::<Value>(sent.body.as_deref().unwrap()).unwrap(),
            json!({"isPublic": "false", "note": "null"})
        );
    }

    #[test]
    fn delete_is_selected_and_flag_dropped() {
        let transport = RecordingTransport::answering(OK_JSON);
        let c = authed(transport.clone());
        c.call("models_MODELID", params(json!({"modelId": 9, "delete": true})))
            .unwrap();
        let sent = transport.last();
        assert_eq!(sent.verb, HttpVerb::Delete);
        assert_eq!(sent.url, "https://api.shapeways.com/models/9/v1");
        assert_eq!(sent.body.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn upload_inlines_file_content() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let transport = RecordingTransport::answering(
            "HTTP/1.1 200 OK\r\n\r\n{\"result\":\"success\",\"modelId\":77}",
        );
        let c = authed(transport.clone());
        let upload = ModelUpload::new(path.clone(), "Cube").with_tag_list(" test, demo ,,cube");
        let reply = c.upload_model(&upload).unwrap();
        assert_eq!(reply.to_value()["modelId"], 77);

        let sent = transport.last();
        assert_eq!(sent.verb, HttpVerb::Post);
        let body: Value = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["file"], "YWJj");
        assert_eq!(
            body["fileName"],
            Path::new(&path).file_name().unwrap().to_str().unwrap()
        );
        assert_eq!(body["hasRightsToModel"], 1);
        assert_eq!(body["acceptTermsAndConditions"], 1);
        assert_eq!(body["tags"], json!(["test", "demo", "cube"]));
        assert_eq!(body["defaultMaterialId"], 6);
    }

    #[test]
    fn reply_is_rendered_in_configured_format() {
        let transport = RecordingTransport::answering(OK_JSON);
        let mut config = ClientConfig::default();
        config.return_format = ReturnFormat::Json;
        let mut c = ShapecodeClient::with_transport(
            ConsumerCredentials::new("ck", "cs"),
            config,
            transport,
        );
        c.set_token(AccessToken::new("tok", "ts"));
        assert_eq!(
            c.call("api", Params::new()).unwrap(),
            ApiReply::Json {
                body: r#"{"result":"success"}"#.into(),
                status: 200
            }
        );
    }

    #[test]
    fn custom_endpoint_pattern_is_used() {
        let transport = RecordingTransport::answering(OK_JSON);
        let mut config = ClientConfig::default();
        config.endpoint = "http://127.0.0.1:8080/{path}/v1".into();
        let mut c = ShapecodeClient::with_transport(
            ConsumerCredentials::new("ck", "cs"),
            config,
            transport.clone(),
        )
        .with_nonce_source(fixed_nonce);
        c.set_token(AccessToken::new("tok", "ts"));
        c.call("printers", Params::new()).unwrap();
        let sent = transport.last();
        assert_eq!(sent.url, "http://127.0.0.1:8080/printers/v1");

        // The header verifies against the base string a server would build.
        let base = signature_base_string(HttpVerb::Get, "http://127.0.0.1:8080/printers/v1", &[
            ("oauth_consumer_key".into(), "ck".into()),
            ("oauth_nonce".into(), "abcdef12".into()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), "1400000000".into()),
            ("oauth_token".into(), "tok".into()),
            ("oauth_version".into(), "1.0".into()),
        ]);
        let signature = crate::signing::sign(
            &ConsumerCredentials::new("ck", "cs"),
            Some(&AccessToken::new("tok", "ts")),
            &base,
        )
        .unwrap();
        assert!(sent
            .header("Authorization")
            .unwrap()
            .contains(&format!("oauth_signature=\"{}\"", crate::encoding::encode(&signature))));
    }

    #[test]
    fn version_and_methods_are_exposed() {
        assert_eq!(
            ShapecodeClient::<RecordingTransport>::version(),
            env!("CARGO_PKG_VERSION")
        );
        let methods = ShapecodeClient::<RecordingTransport>::api_methods();
        assert!(methods[&HttpVerb::Get].contains(&"materials"));
    }
}
