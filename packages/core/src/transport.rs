//! HTTP transport.
//!
//! [`Transport`] is the seam between request construction and the network:
//! the client hands over a fully signed [`TransportRequest`] and gets back the
//! raw response (status line, headers, blank line, body) that
//! [`parse_reply`](crate::reply::parse_reply) understands. [`HttpTransport`]
//! is the production implementation on a blocking `reqwest` client; tests
//! substitute a recording fake.

use std::error::Error as StdError;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{Certificate, Method};
use rustls::CertificateError;
use tracing::{debug, warn};

use crate::error::{CertificateFailure, ClientError};
use crate::registry::HttpVerb;

/// A request ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub verb: HttpVerb,
    /// Absolute URL, query string included for GET.
    pub url: String,
    /// Header name/value pairs, sent in order.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response bytes plus the status code, when the transport knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub bytes: Vec<u8>,
    pub status: Option<u16>,
}

/// Sends one request and returns the raw response.
pub trait Transport {
    fn send(&self, request: &TransportRequest) -> Result<RawResponse, ClientError>;
}

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// PEM bundle that replaces the built-in trust anchors.
    pub ca_bundle: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// Blocking HTTPS transport with peer and host verification always on.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the underlying client.
    ///
    /// # Errors
    ///
    /// - [`ClientError::CertificateValidation`] with
    ///   [`CertificateFailure::BadBundle`]: the CA bundle cannot be read or
    ///   contains no certificates.
    /// - [`ClientError::Configuration`]: the HTTP client cannot be built.
    pub fn new(settings: &TransportSettings) -> Result<Self, ClientError> {
        let mut builder = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .user_agent(concat!("shapecode/", env!("CARGO_PKG_VERSION")));

        if let Some(path) = &settings.ca_bundle {
            let certs = load_bundle(path)?;
            debug!("trusting {} certificates from {}", certs.len(), path.display());
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().map_err(|e| {
            ClientError::Configuration(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &TransportRequest) -> Result<RawResponse, ClientError> {
        let method = match request.verb {
            HttpVerb::Get => Method::GET,
            HttpVerb::Post => Method::POST,
            HttpVerb::Put => Method::PUT,
            HttpVerb::Delete => Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        // reqwest derives Content-Length from the body itself.
        for (name, value) in request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("content-length"))
        {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(|e| classify(&e))?;
        let status = response.status().as_u16();

        let mut raw = format!("HTTP/1.1 {status}\r\n");
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(v) => raw.push_str(&format!("{name}: {v}\r\n")),
                Err(_) => warn!("dropping non-text response header {name}"),
            }
        }
        raw.push_str("\r\n");

        let body = response.bytes().map_err(|e| classify(&e))?;
        let mut bytes = raw.into_bytes();
        bytes.extend_from_slice(&body);

        debug!("{} {} -> {status} ({} body bytes)", request.verb, request.url, body.len());
        Ok(RawResponse {
            bytes,
            status: Some(status),
        })
    }
}

fn load_bundle(path: &PathBuf) -> Result<Vec<Certificate>, ClientError> {
    let bad_bundle = |message: String| ClientError::CertificateValidation {
        failure: CertificateFailure::BadBundle,
        message,
    };
    let pem = fs::read(path)
        .map_err(|e| bad_bundle(format!("cannot read {}: {e}", path.display())))?;
    let certs = Certificate::from_pem_bundle(&pem)
        .map_err(|e| bad_bundle(format!("invalid PEM in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(bad_bundle(format!(
            "{} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

/// Map a `reqwest` error onto the client taxonomy.
///
/// Certificate failures are recognized by the typed `rustls` error somewhere
/// in the source chain, never by message text.
fn classify(err: &reqwest::Error) -> ClientError {
    let chain = error_chain(err);
    match certificate_failure(err) {
        Some(failure) => ClientError::CertificateValidation {
            failure,
            message: chain,
        },
        None if err.is_timeout() => ClientError::Transport(format!("timed out: {chain}")),
        None => ClientError::Transport(chain),
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// Find the `rustls` error behind a failed request and classify it.
fn certificate_failure(err: &(dyn StdError + 'static)) -> Option<CertificateFailure> {
    let mut source = Some(err);
    while let Some(cause) = source {
        if let Some(tls) = rustls_error(cause) {
            return match tls {
                rustls::Error::InvalidCertificate(cert) => Some(classify_certificate(cert)),
                _ => None,
            };
        }
        source = cause.source();
    }
    None
}

/// hyper hands rustls errors up wrapped in an `io::Error`, whose `source()`
/// skips the wrapped value, so look inside it explicitly.
fn rustls_error<'a>(cause: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    cause.downcast_ref::<rustls::Error>().or_else(|| {
        cause
            .downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    })
}

fn classify_certificate(err: &CertificateError) -> CertificateFailure {
    match err {
        CertificateError::Expired
        | CertificateError::ExpiredContext { .. }
        | CertificateError::NotValidYet
        | CertificateError::NotValidYetContext { .. } => CertificateFailure::Expired,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
            CertificateFailure::NotValidForName
        }
        CertificateError::UnknownIssuer => CertificateFailure::UnknownIssuer,
        CertificateError::BadSignature => CertificateFailure::BadSignature,
        CertificateError::Revoked => CertificateFailure::Revoked,
        CertificateError::BadEncoding => CertificateFailure::BadEncoding,
        _ => CertificateFailure::Other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
