//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! The signature base string is
//!
//! ```text
//! VERB&encode(base URL)&encode(sorted "key=value" pairs joined by "&")
//! ```
//!
//! where the pairs are the `oauth_*` protocol parameters merged with the
//! request parameters being signed, each side percent-encoded with
//! [`encode`]. The signing key is `encode(consumer_secret)&encode(token_secret)`.
//! Query parameters present on the URL are moved into the pair set, so the
//! base URL never carries a query string.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

use crate::encoding::{decode, encode};
use crate::error::ClientError;
use crate::registry::HttpVerb;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The application's consumer key and secret.
///
/// Fixed for the lifetime of a client; build one and pass it in.
#[derive(Clone, PartialEq, Eq)]
pub struct ConsumerCredentials {
    key: String,
    secret: String,
}

impl ConsumerCredentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for ConsumerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerCredentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A request or access token and its secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    secret: String,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Nonce / timestamp
// ---------------------------------------------------------------------------

/// The per-request `oauth_nonce` and `oauth_timestamp` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthNonce {
    pub nonce: String,
    pub timestamp: i64,
}

impl OAuthNonce {
    /// Use explicit values (tests and replayable fixtures).
    pub fn new(nonce: impl Into<String>, timestamp: i64) -> Self {
        Self {
            nonce: nonce.into(),
            timestamp,
        }
    }

    /// A fresh 32-hex-character random nonce and the current unix time.
    pub fn fresh() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self {
            nonce: hex::encode(bytes),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Compute the `Authorization` header value for one request.
///
/// `params` are the raw (unencoded) request parameters that take part in the
/// signature; pass an empty slice for requests whose JSON body is not signed.
///
/// # Errors
///
/// Returns [`ClientError::Signing`] if the consumer key or secret is empty.
pub fn authorization_header(
    consumer: &ConsumerCredentials,
    token: Option<&AccessToken>,
    verb: HttpVerb,
    url: &str,
    params: &[(String, String)],
    nonce: &OAuthNonce,
) -> Result<String, ClientError> {
    if consumer.key().is_empty() {
        return Err(ClientError::Signing(
            "to generate a signature, the consumer key must be set".into(),
        ));
    }

    let mut oauth_params = vec![
        ("oauth_consumer_key".to_string(), consumer.key().to_string()),
        ("oauth_nonce".to_string(), nonce.nonce.clone()),
        (
            "oauth_signature_method".to_string(),
            SIGNATURE_METHOD.to_string(),
        ),
        ("oauth_timestamp".to_string(), nonce.timestamp.to_string()),
        ("oauth_version".to_string(), OAUTH_VERSION.to_string()),
    ];
    if let Some(token) = token {
        oauth_params.push(("oauth_token".to_string(), token.token().to_string()));
    }

    let (base_url, query) = split_query(url);
    let mut signed: Vec<(String, String)> = oauth_params.clone();
    signed.extend(params.iter().cloned());
    signed.extend(query);

    let base = signature_base_string(verb, base_url, &signed);
    let signature = sign(consumer, token, &base)?;

    oauth_params.push(("oauth_signature".to_string(), signature));
    oauth_params.sort();

    let fields = oauth_params
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {fields}"))
}

/// Build the signature base string from the full set of pairs to sign.
///
/// Pairs are encoded, then sorted byte-wise by encoded key and value.
pub fn signature_base_string(verb: HttpVerb, base_url: &str, pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}&{}&{}", verb.as_str(), encode(base_url), encode(&joined))
}

/// `base64(HMAC-SHA1(encode(consumer_secret)&encode(token_secret), base))`
///
/// # Errors
///
/// Returns [`ClientError::Signing`] if the consumer secret is empty.
pub fn sign(
    consumer: &ConsumerCredentials,
    token: Option<&AccessToken>,
    base: &str,
) -> Result<String, ClientError> {
    if consumer.secret().is_empty() {
        return Err(ClientError::Signing(
            "to generate a hash, the consumer secret must be set".into(),
        ));
    }
    let key = format!(
        "{}&{}",
        encode(consumer.secret()),
        encode(token.map(AccessToken::secret).unwrap_or(""))
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    mac.update(base.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Split `url` into its base and decoded query pairs.
fn split_query(url: &str) -> (&str, Vec<(String, String)>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url, Vec::new());
    };
    let pairs = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(s), String::new()),
        })
        .collect();
    (base, pairs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
