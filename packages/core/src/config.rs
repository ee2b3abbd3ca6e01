//! Client configuration, populated from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;
use crate::reply::ReturnFormat;
use crate::signing::{AccessToken, ConsumerCredentials};
use crate::transport::TransportSettings;

/// Production endpoint pattern; `{path}` is replaced by the concrete path.
pub const DEFAULT_ENDPOINT: &str = "https://api.shapeways.com/{path}/v1";

const PATH_PLACEHOLDER: &str = "{path}";

/// Connection and rendering settings for a client.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SHAPECODE_ENDPOINT` | `https://api.shapeways.com/{path}/v1` | Endpoint pattern, must contain `{path}` |
/// | `SHAPECODE_TIMEOUT_MS` | `2000` | Whole-request timeout |
/// | `SHAPECODE_CONNECT_TIMEOUT_MS` | `5000` | Connect timeout |
/// | `SHAPECODE_CA_BUNDLE` | (absent = built-in roots) | PEM file of trust anchors |
/// | `SHAPECODE_RETURN_FORMAT` | `object` | `object`, `map` or `json` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Endpoint pattern, e.g. `"https://api.shapeways.com/{path}/v1"`.
    pub endpoint: String,

    pub timeout: Duration,

    pub connect_timeout: Duration,

    /// Replaces the built-in trust anchors when set.
    pub ca_bundle: Option<PathBuf>,

    pub return_format: ReturnFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            timeout: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(5000),
            ca_bundle: None,
            return_format: ReturnFormat::Object,
        }
    }
}

impl ClientConfig {
    /// Populate config from the process environment, applying defaults
    /// where absent.
    ///
    /// # Errors
    ///
    /// [`ClientError::Configuration`] for unparsable values or an endpoint
    /// without `{path}`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let defaults = Self::default();

        let endpoint = lookup("SHAPECODE_ENDPOINT").unwrap_or(defaults.endpoint);
        if !endpoint.contains(PATH_PLACEHOLDER) {
            return Err(ClientError::Configuration(format!(
                "SHAPECODE_ENDPOINT must contain {PATH_PLACEHOLDER}, got {endpoint:?}"
            )));
        }

        let timeout = millis(&lookup, "SHAPECODE_TIMEOUT_MS")?.unwrap_or(defaults.timeout);
        let connect_timeout =
            millis(&lookup, "SHAPECODE_CONNECT_TIMEOUT_MS")?.unwrap_or(defaults.connect_timeout);

        let return_format = match lookup("SHAPECODE_RETURN_FORMAT") {
            Some(v) => v.parse().map_err(ClientError::Configuration)?,
            None => defaults.return_format,
        };

        Ok(Self {
            endpoint,
            timeout,
            connect_timeout,
            ca_bundle: lookup("SHAPECODE_CA_BUNDLE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            return_format,
        })
    }

    /// Absolute URL for a concrete path.
    ///
    /// The `api` discovery operation is the one path served with a trailing
    /// slash.
    pub fn endpoint_url(&self, path: &str) -> String {
        let mut url = self.endpoint.replace(PATH_PLACEHOLDER, path);
        if path == "api" {
            url.push('/');
        }
        url
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: self.connect_timeout,
            timeout: self.timeout,
            ca_bundle: self.ca_bundle.clone(),
        }
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ClientError> {
    lookup(key)
        .map(|v| {
            v.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                ClientError::Configuration(format!("{key} must be a number of milliseconds, got {v:?}"))
            })
        })
        .transpose()
}

/// Consumer credentials and an optional access token read from the
/// environment.
///
/// | Variable | Description |
/// |----------|-------------|
/// | `SHAPEWAYS_CONSUMER_KEY` | Required |
/// | `SHAPEWAYS_CONSUMER_SECRET` | Required |
/// | `SHAPEWAYS_ACCESS_TOKEN` | Optional, needs its secret |
/// | `SHAPEWAYS_ACCESS_TOKEN_SECRET` | Optional, needs its token |
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    pub consumer: ConsumerCredentials,
    pub token: Option<AccessToken>,
}

impl EnvCredentials {
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ClientError::Configuration(format!("{key} is not set")))
        };
        let consumer = ConsumerCredentials::new(
            required("SHAPEWAYS_CONSUMER_KEY")?,
            required("SHAPEWAYS_CONSUMER_SECRET")?,
        );

        let token = match (
            lookup("SHAPEWAYS_ACCESS_TOKEN").filter(|v| !v.is_empty()),
            lookup("SHAPEWAYS_ACCESS_TOKEN_SECRET").filter(|v| !v.is_empty()),
        ) {
            (Some(token), Some(secret)) => Some(AccessToken::new(token, secret)),
            (None, None) => None,
            _ => {
                return Err(ClientError::Configuration(
                    "SHAPEWAYS_ACCESS_TOKEN and SHAPEWAYS_ACCESS_TOKEN_SECRET must be set together"
                        .into(),
                ))
            }
        };

        Ok(Self { consumer, token })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn values_are_read() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SHAPECODE_ENDPOINT", "http://127.0.0.1:8080/{path}/v1"),
            ("SHAPECODE_TIMEOUT_MS", "750"),
            ("SHAPECODE_CA_BUNDLE", "/etc/ssl/custom.pem"),
            ("SHAPECODE_RETURN_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "http://127.0.0.1:8080/{path}/v1");
        assert_eq!(config.timeout, Duration::from_millis(750));
        assert_eq!(config.ca_bundle, Some(PathBuf::from("/etc/ssl/custom.pem")));
        assert_eq!(config.return_format, ReturnFormat::Json);
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        for vars in [
            [("SHAPECODE_TIMEOUT_MS", "soon")],
            [("SHAPECODE_RETURN_FORMAT", "xml")],
            [("SHAPECODE_ENDPOINT", "https://api.example/v1")],
        ] {
            let err = ClientConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ClientError::Configuration(_)), "{vars:?}");
        }
    }

    #[test]
    fn endpoint_url_substitutes_path() {
        let config = ClientConfig::default();
        assert_eq!(
            config.endpoint_url("models/42/info"),
            "https://api.shapeways.com/models/42/info/v1"
        );
        assert_eq!(config.endpoint_url("api"), "https://api.shapeways.com/api/v1/");
    }

    #[test]
    fn credentials_require_consumer_pair() {
        let err = EnvCredentials::from_lookup(lookup(&[("SHAPEWAYS_CONSUMER_KEY", "ck")]))
            .unwrap_err();
        assert!(err.to_string().contains("SHAPEWAYS_CONSUMER_SECRET"));

        let creds = EnvCredentials::from_lookup(lookup(&[
            ("SHAPEWAYS_CONSUMER_KEY", "ck"),
            ("SHAPEWAYS_CONSUMER_SECRET", "cs"),
        ]))
        .unwrap();
        assert_eq!(creds.consumer.key(), "ck");
        assert!(creds.token.is_none());
    }

    #[test]
    fn half_a_token_is_rejected() {
        let err = EnvCredentials::from_lookup(lookup(&[
            ("SHAPEWAYS_CONSUMER_KEY", "ck"),
            ("SHAPEWAYS_CONSUMER_SECRET", "cs"),
            ("SHAPEWAYS_ACCESS_TOKEN", "tok"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));

        let creds = EnvCredentials::from_lookup(lookup(&[
            ("SHAPEWAYS_CONSUMER_KEY", "ck"),
            ("SHAPEWAYS_CONSUMER_SECRET", "cs"),
            ("SHAPEWAYS_ACCESS_TOKEN", "tok"),
            ("SHAPEWAYS_ACCESS_TOKEN_SECRET", "ts"),
        ]))
        .unwrap();
        assert_eq!(creds.token.map(|t| t.token().to_string()), Some("tok".into()));
    }
}
