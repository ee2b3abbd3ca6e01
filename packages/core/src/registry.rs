//! The closed set of API operations, keyed by HTTP verb and templated path.
//!
//! The registry is built once on first use and is read-only afterwards. A
//! templated path that is not listed here cannot be called.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// HTTP verbs used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One callable endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub verb: HttpVerb,
    /// Templated path, e.g. `models/{modelId}/files/{fileVersion}`.
    pub template: &'static str,
    /// Placeholder names in template order, e.g. `["modelId", "fileVersion"]`.
    pub path_params: Vec<&'static str>,
}

impl OperationDescriptor {
    fn new(verb: HttpVerb, template: &'static str) -> Self {
        Self {
            verb,
            template,
            path_params: placeholders(template),
        }
    }

    /// Token-acquisition endpoints are signed without an access token and
    /// take a form-encoded body.
    pub fn is_token_acquisition(&self) -> bool {
        self.template.starts_with("oauth1/")
    }
}

const ENDPOINTS: &[(HttpVerb, &str)] = &[
    // API
    (HttpVerb::Get, "api"),
    // Cart
    (HttpVerb::Get, "orders/cart"),
    (HttpVerb::Post, "orders/cart"),
    // Materials
    (HttpVerb::Get, "materials"),
    (HttpVerb::Get, "materials/{materialId}"),
    // Models
    (HttpVerb::Get, "models"),
    (HttpVerb::Post, "models"),
    (HttpVerb::Get, "models/{modelId}"),
    (HttpVerb::Delete, "models/{modelId}"),
    (HttpVerb::Get, "models/{modelId}/info"),
    (HttpVerb::Put, "models/{modelId}/info"),
    (HttpVerb::Get, "models/{modelId}/files/{fileVersion}"),
    (HttpVerb::Post, "models/{modelId}/files"),
    (HttpVerb::Post, "models/{modelId}/photos"),
    // Printers
    (HttpVerb::Get, "printers"),
    (HttpVerb::Get, "printers/{printerId}"),
    // Categories
    (HttpVerb::Get, "categories"),
    (HttpVerb::Get, "categories/{categoryId}"),
    // Price
    (HttpVerb::Post, "price"),
    // OAuth1
    (HttpVerb::Post, "oauth1/access_token"),
    (HttpVerb::Post, "oauth1/request_token"),
];

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry {
    operations: ENDPOINTS
        .iter()
        .map(|&(verb, template)| OperationDescriptor::new(verb, template))
        .collect(),
});

/// Read-only table of every callable endpoint.
#[derive(Debug)]
pub struct Registry {
    operations: Vec<OperationDescriptor>,
}

impl Registry {
    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &REGISTRY
    }

    /// Find the descriptor for `template` under `verb`.
    pub fn find(&self, verb: HttpVerb, template: &str) -> Option<&OperationDescriptor> {
        self.operations
            .iter()
            .find(|op| op.verb == verb && op.template == template)
    }

    /// All descriptors registered for `template`, in registry order.
    pub fn verbs_for<'a>(
        &'a self,
        template: &'a str,
    ) -> impl Iterator<Item = &'a OperationDescriptor> + 'a {
        self.operations.iter().filter(move |op| op.template == template)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.iter()
    }

    /// Templated paths grouped by verb.
    pub fn api_methods(&self) -> BTreeMap<HttpVerb, Vec<&'static str>> {
        let mut grouped: BTreeMap<HttpVerb, Vec<&'static str>> = BTreeMap::new();
        for op in &self.operations {
            grouped.entry(op.verb).or_default().push(op.template);
        }
        grouped
    }
}

/// Extract `{name}` placeholders from a templated path.
fn placeholders(template: &str) -> Vec<&str> {
    template
        .split('/')
        .filter_map(|seg| seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
