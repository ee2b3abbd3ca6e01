//! Error taxonomy for every fallible client operation.
//!
//! Reply decoding never produces an error: a body that is neither JSON, nor
//! an XML error document, nor a query string still yields a (possibly empty)
//! [`Reply`](crate::Reply). Everything that can fail before or during the
//! network call is a [`ClientError`].

use thiserror::Error;

/// The class of a TLS peer-certificate validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateFailure {
    /// The chain does not end in a configured trust anchor.
    UnknownIssuer,
    /// The certificate is expired or not yet valid.
    Expired,
    /// The certificate does not cover the requested host name.
    NotValidForName,
    /// A signature in the chain does not verify.
    BadSignature,
    /// The certificate has been revoked.
    Revoked,
    /// The peer sent a certificate that could not be parsed.
    BadEncoding,
    /// The configured trust-anchor bundle is unreadable or malformed.
    BadBundle,
    /// Any other certificate problem reported by the TLS stack.
    Other,
}

impl std::fmt::Display for CertificateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CertificateFailure::UnknownIssuer => "unknown issuer",
            CertificateFailure::Expired => "expired",
            CertificateFailure::NotValidForName => "not valid for name",
            CertificateFailure::BadSignature => "bad signature",
            CertificateFailure::Revoked => "revoked",
            CertificateFailure::BadEncoding => "bad encoding",
            CertificateFailure::BadBundle => "bad trust bundle",
            CertificateFailure::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors returned by [`ShapecodeClient`](crate::ShapecodeClient) and the
/// building blocks it is composed of.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credentials or settings are missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation identifier names a path placeholder that has no value.
    #[error(
        "to call the templated method \"{template}\", specify the parameter value for \"{parameter}\""
    )]
    MissingPathParameter { template: String, parameter: String },

    /// The resolved templated path is not in the endpoint registry.
    #[error("can't find HTTP method to use for \"{0}\"")]
    UnknownOperation(String),

    /// The OAuth signature could not be computed.
    #[error("signing error: {0}")]
    Signing(String),

    /// TLS peer or host verification failed.
    #[error("error while validating the API certificate ({failure}): {message}")]
    CertificateValidation {
        failure: CertificateFailure,
        message: String,
    },

    /// Network-level failure: timeout, refused connection, DNS, I/O.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// `true` for errors raised before anything was sent over the wire.
    pub fn is_local(&self) -> bool {
        !matches!(
            self,
            ClientError::CertificateValidation { .. } | ClientError::Transport(_)
        )
    }
}
