//! Compiled capabilities — one upstream operation each.
//!
//! A `Capability` is derived from one OpenAPI `(path, method)` pair at
//! registration time and never persisted separately; restarts recompile it
//! from the stored spec document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The HTTP verbs a capability may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse an OpenAPI verb key (`get`, `post`, ...).
    pub fn from_spec_key(key: &str) -> Option<Self> {
        match key {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// GET and DELETE carry no request body; their inputs ride the query string.
    pub fn is_bodyless(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared parameter of a capability, merged from the operation's
/// query/path parameters and (for verbs with a body) its JSON body schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: String,

    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "enum")]
    pub allowed: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A single upstream operation, addressable under `/agents/api/...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Operation identifier: `operationId`, or a stable derivation from the
    /// method and path.
    pub name: String,

    pub method: HttpMethod,

    /// Upstream path with `{param}` placeholders, relative to the base URL.
    pub path_template: String,

    /// Declared parameters, ordered by name for stable manifests.
    pub params: BTreeMap<String, ParamSpec>,

    /// Whether invocation demands a valid session token.
    pub requires_session: bool,
}

impl Capability {
    /// The route this capability mounts at, relative to the discovery base.
    ///
    /// Dotted names fan out into path segments (`a.b.c` →
    /// `/agents/api/a/b/c`); the sentinel name `detail` takes a trailing
    /// path parameter; anything else is a single segment.
    pub fn route_path(&self) -> String {
        if self.name == "detail" {
            return "/agents/api/detail/{id}".to_string();
        }
        if self.name.contains('.') {
            let segments: Vec<&str> = self.name.split('.').filter(|s| !s.is_empty()).collect();
            return format!("/agents/api/{}", segments.join("/"));
        }
        format!("/agents/api/{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(name: &str) -> Capability {
        Capability {
            name: name.into(),
            method: HttpMethod::Get,
            path_template: "/items".into(),
            params: BTreeMap::new(),
            requires_session: false,
        }
    }

    #[test]
    fn plain_name_routes_to_single_segment() {
        assert_eq!(cap("listItems").route_path(), "/agents/api/listItems");
    }

    #[test]
    fn dotted_name_fans_out() {
        assert_eq!(cap("shop.cart.add").route_path(), "/agents/api/shop/cart/add");
    }

    #[test]
    fn detail_sentinel_takes_id_parameter() {
        assert_eq!(cap("detail").route_path(), "/agents/api/detail/{id}");
    }

    #[test]
    fn method_spec_keys() {
        assert_eq!(HttpMethod::from_spec_key("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::from_spec_key("patch"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::from_spec_key("head"), None);
        assert_eq!(HttpMethod::from_spec_key("GET"), None);
    }

    #[test]
    fn bodyless_verbs() {
        assert!(HttpMethod::Get.is_bodyless());
        assert!(HttpMethod::Delete.is_bodyless());
        assert!(!HttpMethod::Post.is_bodyless());
        assert!(!HttpMethod::Put.is_bodyless());
    }

    #[test]
    fn param_spec_serializes_openapi_field_names() {
        let spec = ParamSpec {
            param_type: "string".into(),
            required: true,
            allowed: Some(vec!["a".into(), "b".into()]),
            default: Some("a".into()),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "string");
        assert!(json.get("enum").is_some());
    }
}
