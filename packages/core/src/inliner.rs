//! Inline uploaded files into request parameters.
//!
//! Upload endpoints take the file content in the JSON body as percent-encoded
//! base64. Callers pass a filesystem path instead; for the allow-listed
//! `(template, parameter)` pairs below the path is replaced by the encoded
//! content. Any value that is not a readable, non-empty file stays a literal
//! string.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, warn};

use crate::encoding::{encode, Params};

const FILE_PARAMS: &[(&str, &str)] = &[("models", "file"), ("models/{modelId}/files", "file")];

/// Replace allow-listed file-path values in `params` with encoded content.
///
/// Returns the number of parameters that were inlined.
pub fn inline_files(template: &str, params: &mut Params) -> usize {
    let mut inlined = 0;
    for &(_, name) in FILE_PARAMS.iter().filter(|(t, _)| *t == template) {
        let Some(Value::String(candidate)) = params.get(name) else {
            continue;
        };
        if let Some(encoded) = read_encoded(Path::new(candidate)) {
            debug!("inlined {name} for {template} ({} encoded bytes)", encoded.len());
            params.insert(name.to_string(), Value::String(encoded));
            inlined += 1;
        }
    }
    inlined
}

fn read_encoded(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => Some(encode(&BASE64.encode(bytes))),
        Ok(_) => None,
        Err(e) => {
            warn!("could not read {} for upload: {e}", path.display());
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use serde_json::json;
    use tempfile::NamedTempFile;

    fn temp_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    fn params_with(key: &str, value: &str) -> Params {
        let mut params = Params::new();
        params.insert(key.into(), json!(value));
        params
    }

    #[test]
    fn allow_listed_file_is_inlined() {
        let file = temp_file(b"solid cube\n");
        let path = file.path().to_str().unwrap();
        let mut params = params_with("file", path);

        assert_eq!(inline_files("models", &mut params), 1);
        // base64("solid cube\n") == "c29saWQgY3ViZQo=", '=' percent-encoded.
        assert_eq!(params["file"], "c29saWQgY3ViZQo%3D");
    }

    #[test]
    fn model_files_endpoint_is_allow_listed() {
        let file = temp_file(b"abc");
        let mut params = params_with("file", file.path().to_str().unwrap());
        assert_eq!(inline_files("models/{modelId}/files", &mut params), 1);
        assert_eq!(params["file"], "YWJj");
    }

    #[test]
    fn other_parameter_names_pass_through() {
        let file = temp_file(b"abc");
        let path = file.path().to_str().unwrap().to_string();
        let mut params = params_with("description", &path);
        assert_eq!(inline_files("models", &mut params), 0);
        assert_eq!(params["description"], json!(path));
    }

    #[test]
    fn other_endpoints_pass_through() {
        let file = temp_file(b"abc");
        let path = file.path().to_str().unwrap().to_string();
        let mut params = params_with("file", &path);
        assert_eq!(inline_files("models/{modelId}/photos", &mut params), 0);
        assert_eq!(params["file"], json!(path));
    }

    #[test]
    fn missing_or_empty_file_stays_literal() {
        let mut params = params_with("file", "/definitely/not/here.stl");
        assert_eq!(inline_files("models", &mut params), 0);
        assert_eq!(params["file"], "/definitely/not/here.stl");

        let empty = temp_file(b"");
        let path = empty.path().to_str().unwrap().to_string();
        let mut params = params_with("file", &path);
        assert_eq!(inline_files("models", &mut params), 0);
        assert_eq!(params["file"], json!(path));
    }
}
