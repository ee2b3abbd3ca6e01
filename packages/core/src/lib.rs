//! Client library for the Shapeways REST API.
//!
//! The API exposes a fixed set of path-templated endpoints, signs every
//! request with OAuth 1.0a (HMAC-SHA1) and answers in JSON, a minimal XML
//! error document or a query string. This crate turns an operation name and
//! a parameter map into a signed HTTP call and normalizes whatever comes back
//! into one [`Reply`] shape.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | [`ShapecodeClient`]: the resolve → sign → send → normalize flow |
//! | [`registry`] | The closed set of endpoints, [`HttpVerb`] and [`OperationDescriptor`] |
//! | [`resolver`] | Operation identifier → verb, concrete path and residual parameters |
//! | [`signing`] | OAuth 1.0a base string, signature and `Authorization` header |
//! | [`encoding`] | Strict percent-encoding and query/form building |
//! | [`inliner`] | Base64 inlining of upload files |
//! | [`transport`] | The [`Transport`] seam and the blocking [`HttpTransport`] |
//! | [`reply`] | Reply decoding and the three [`ReturnFormat`]s |
//! | [`config`] | [`ClientConfig`] and environment loading |
//! | [`error`] | [`ClientError`] |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use serde_json::json;
//! use shapecode::{AccessToken, ClientConfig, ConsumerCredentials, ShapecodeClient};
//!
//! let mut client = ShapecodeClient::new(
//!     ConsumerCredentials::new("consumer-key", "consumer-secret"),
//!     ClientConfig::default(),
//! )?;
//! client.set_token(AccessToken::new("token", "token-secret"));
//!
//! let params = json!({"modelId": 1234}).as_object().cloned().unwrap();
//! let info = client.call("models_MODELID_info", params)?;
//! println!("{}", info.to_value());
//! ```

pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod inliner;
pub mod registry;
pub mod reply;
pub mod resolver;
pub mod signing;
pub mod transport;

pub use client::{ModelUpload, ShapecodeClient};
pub use config::{ClientConfig, EnvCredentials};
pub use encoding::Params;
pub use error::{CertificateFailure, ClientError};
pub use registry::{HttpVerb, OperationDescriptor, Registry};
pub use reply::{ApiReply, Reply, ReturnFormat};
pub use signing::{AccessToken, ConsumerCredentials, OAuthNonce};
pub use transport::{HttpTransport, RawResponse, Transport, TransportRequest};
