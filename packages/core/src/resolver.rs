//! Operation identifier → HTTP verb, concrete path and residual parameters.
//!
//! Identifiers are path segments joined by `_`. Inside a segment, a run of
//! two or more uppercase letters marks a path placeholder and a single
//! uppercase letter marks a camelCase word boundary:
//!
//! | Identifier | Templated path |
//! |------------|----------------|
//! | `models_MODELID_info` | `models/{modelId}/info` |
//! | `models_MODELID_files_FILEVERSION` | `models/{modelId}/files/{fileVersion}` |
//! | `oauth1_requestToken` | `oauth1/request_token` |
//!
//! Placeholder values are taken out of the parameter map; what remains is
//! used for verb disambiguation and then sent as query string or body.

use serde_json::Value;
use tracing::debug;

use crate::encoding::{encode, scalar_to_string, Params};
use crate::error::ClientError;
use crate::registry::{HttpVerb, OperationDescriptor, Registry};

/// The outcome of resolving an identifier against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCall {
    pub verb: HttpVerb,
    /// Concrete path with placeholder values substituted.
    pub path: String,
    pub descriptor: OperationDescriptor,
    /// Parameters left after placeholder extraction and disambiguation.
    pub params: Params,
}

impl ResolvedCall {
    pub fn template(&self) -> &'static str {
        self.descriptor.template
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Literal(String),
    Placeholder(String),
}

/// Resolve `identifier` with `params` against `registry`.
///
/// # Errors
///
/// - [`ClientError::MissingPathParameter`]: a placeholder has no value, or
///   its value is null, an array or an object.
/// - [`ClientError::UnknownOperation`]: the templated path (after verb
///   disambiguation) is not registered.
pub fn resolve(
    registry: &Registry,
    identifier: &str,
    mut params: Params,
) -> Result<ResolvedCall, ClientError> {
    let pieces = parse_identifier(identifier)?;
    let template = render_template(&pieces);

    let mut path = String::new();
    for piece in &pieces {
        match piece {
            Piece::Literal(text) => path.push_str(text),
            Piece::Placeholder(key) => {
                // Only scalars fill a path segment; a container or null would
                // render as an empty segment.
                let value = params
                    .remove(key.as_str())
                    .filter(|v| !matches!(v, Value::Array(_) | Value::Object(_) | Value::Null))
                    .ok_or_else(|| ClientError::MissingPathParameter {
                        template: template.clone(),
                        parameter: key.clone(),
                    })?;
                path.push_str(&encode(&scalar_to_string(&value)));
            }
        }
    }

    let descriptor = match disambiguate(&template, &mut params) {
        Some(verb) => registry.find(verb, &template),
        None => registry.verbs_for(&template).next(),
    }
    .ok_or_else(|| ClientError::UnknownOperation(template.clone()))?;

    debug!(
        "resolved {identifier} to {} {} ({} residual params)",
        descriptor.verb,
        descriptor.template,
        params.len()
    );

    Ok(ResolvedCall {
        verb: descriptor.verb,
        path,
        descriptor: descriptor.clone(),
        params,
    })
}

/// Pick the verb for templates that are registered under more than one.
///
/// Returns `None` for single-verb templates.
fn disambiguate(template: &str, params: &mut Params) -> Option<HttpVerb> {
    match template {
        "orders/cart" => Some(if params.is_empty() {
            HttpVerb::Get
        } else {
            HttpVerb::Post
        }),
        "models" => Some(if params.contains_key("fileName") {
            HttpVerb::Post
        } else {
            HttpVerb::Get
        }),
        "models/{modelId}" => {
            if params.get("delete").is_some_and(is_truthy) {
                params.remove("delete");
                Some(HttpVerb::Delete)
            } else {
                Some(HttpVerb::Get)
            }
        }
        "models/{modelId}/info" => Some(if params.is_empty() {
            HttpVerb::Get
        } else {
            HttpVerb::Put
        }),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0" || s == "false"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn parse_identifier(identifier: &str) -> Result<Vec<Piece>, ClientError> {
    let unknown = || ClientError::UnknownOperation(identifier.to_string());
    let mut pieces = Vec::new();

    for (i, segment) in identifier.split('_').enumerate() {
        if segment.is_empty() {
            return Err(unknown());
        }
        if i > 0 {
            push_literal(&mut pieces, "/");
        }

        let chars: Vec<char> = segment.chars().collect();
        let mut pos = 0;
        while pos < chars.len() {
            let c = chars[pos];
            if !c.is_ascii_uppercase() {
                if !(c.is_ascii_alphanumeric() || c == '-' || c == '.') {
                    return Err(unknown());
                }
                push_literal(&mut pieces, &c.to_string());
                pos += 1;
                continue;
            }
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_uppercase() {
                pos += 1;
            }
            let run: String = chars[start..pos].iter().collect();
            if run.len() >= 2 {
                pieces.push(Piece::Placeholder(placeholder_key(&run)));
            } else {
                push_literal(&mut pieces, &format!("_{}", run.to_ascii_lowercase()));
            }
        }
    }

    Ok(pieces)
}

fn push_literal(pieces: &mut Vec<Piece>, text: &str) {
    if let Some(Piece::Literal(last)) = pieces.last_mut() {
        last.push_str(text);
    } else {
        pieces.push(Piece::Literal(text.to_string()));
    }
}

/// `MODELID` → `modelId`, `FILEVERSION` → `fileVersion`, `FOO` → `foo`.
fn placeholder_key(token: &str) -> String {
    let lower = token.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix("id") {
        format!("{stem}Id")
    } else if let Some(stem) = lower.strip_suffix("version") {
        format!("{stem}Version")
    } else {
        lower
    }
}

fn render_template(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .map(|piece| match piece {
            Piece::Literal(text) => text.clone(),
            Piece::Placeholder(key) => format!("{{{key}}}"),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    fn run(identifier: &str, value: Value) -> Result<ResolvedCall, ClientError> {
        resolve(Registry::global(), identifier, params(value))
    }

    #[test]
    fn placeholder_is_substituted_and_removed() {
        let call = run("models_MODELID_info", json!({"modelId": 42})).unwrap();
        assert_eq!(call.verb, HttpVerb::Get);
        assert_eq!(call.path, "models/42/info");
        assert_eq!(call.template(), "models/{modelId}/info");
        assert!(call.params.is_empty());
    }

    #[test]
    fn every_placeholder_is_substituted() {
        let call = run(
            "models_MODELID_files_FILEVERSION",
            json!({"modelId": "7", "fileVersion": "2", "file": 1}),
        )
        .unwrap();
        assert_eq!(call.path, "models/7/files/2");
        assert_eq!(call.template(), "models/{modelId}/files/{fileVersion}");
        assert_eq!(call.params, params(json!({"file": 1})));
    }

    #[test]
    fn missing_placeholder_names_template_and_key() {
        let err = run("materials_MATERIALID", json!({"other": 1})).unwrap_err();
        match err {
            ClientError::MissingPathParameter {
                template,
                parameter,
            } => {
                assert_eq!(template, "materials/{materialId}");
                assert_eq!(parameter, "materialId");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn container_placeholder_values_are_rejected() {
        for value in [json!([]), json!([1, 2]), json!({}), json!({"id": 3}), Value::Null] {
            let err = run("models_MODELID_info", json!({"modelId": value})).unwrap_err();
            assert!(
                matches!(
                    &err,
                    ClientError::MissingPathParameter { parameter, .. } if parameter == "modelId"
                ),
                "got {err:?}"
            );
        }
    }

    #[test]
    fn camel_case_becomes_snake_segment() {
        let call = run("oauth1_requestToken", json!({"oauth_callback": "oob"})).unwrap();
        assert_eq!(call.verb, HttpVerb::Post);
        assert_eq!(call.path, "oauth1/request_token");
        assert!(call.descriptor.is_token_acquisition());
    }

    #[test]
    fn models_with_file_name_is_post() {
        let call = run("models", json!({"fileName": "x.stl"})).unwrap();
        assert_eq!(call.verb, HttpVerb::Post);
        let call = run("models", json!({})).unwrap();
        assert_eq!(call.verb, HttpVerb::Get);
    }

    #[test]
    fn models_id_with_truthy_delete_is_delete() {
        let call = run("models_MODELID", json!({"modelId": 5, "delete": true})).unwrap();
        assert_eq!(call.verb, HttpVerb::Delete);
        assert!(!call.params.contains_key("delete"));

        let call = run("models_MODELID", json!({"modelId": 5})).unwrap();
        assert_eq!(call.verb, HttpVerb::Get);
    }

    #[test]
    fn falsy_delete_stays_get_and_keeps_param() {
        let call = run("models_MODELID", json!({"modelId": 5, "delete": "false"})).unwrap();
        assert_eq!(call.verb, HttpVerb::Get);
        assert!(call.params.contains_key("delete"));
    }

    #[test]
    fn cart_and_info_switch_on_param_presence() {
        assert_eq!(run("orders_cart", json!({})).unwrap().verb, HttpVerb::Get);
        assert_eq!(
            run("orders_cart", json!({"modelId": 1})).unwrap().verb,
            HttpVerb::Post
        );
        assert_eq!(
            run("models_MODELID_info", json!({"modelId": 1, "title": "t"}))
                .unwrap()
                .verb,
            HttpVerb::Put
        );
    }

    #[test]
    fn unregistered_template_is_unknown() {
        let err = run("widgets", json!({})).unwrap_err();
        assert!(matches!(err, ClientError::UnknownOperation(t) if t == "widgets"));
    }

    #[test]
    fn malformed_identifier_is_unknown() {
        assert!(matches!(
            run("models__info", json!({})),
            Err(ClientError::UnknownOperation(_))
        ));
        assert!(matches!(
            run("", json!({})),
            Err(ClientError::UnknownOperation(_))
        ));
    }

    #[test]
    fn placeholder_values_are_path_encoded() {
        let call = run("printers_PRINTERID", json!({"printerId": "a/b"})).unwrap();
        assert_eq!(call.path, "printers/a%2Fb");
    }

    #[test]
    fn placeholder_key_shapes() {
        assert_eq!(placeholder_key("MODELID"), "modelId");
        assert_eq!(placeholder_key("FILEVERSION"), "fileVersion");
        assert_eq!(placeholder_key("SLUG"), "slug");
    }
}
