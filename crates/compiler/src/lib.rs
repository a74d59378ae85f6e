//! OpenAPI → capability compiler.
//!
//! Runs once per registration (and once per tenant at startup restoration).
//! Walks the document's `paths`, derives one [`Capability`] per
//! `(path, verb)` pair, and merges parameter declarations from the query,
//! path, and JSON body schemas. Spec semantics beyond what the gateway
//! inspects are ignored.

pub mod upstream;

use std::collections::BTreeMap;

use agentdoor_core::{Capability, CompileError, HttpMethod, ParamSpec};
use serde_json::Value;
use tracing::debug;

pub use upstream::{Invocation, UpstreamCaller};

/// Largest `paths` object a registration may carry.
pub const MAX_SPEC_PATHS: usize = 100;

/// Verb keys walked per path, in table order.
const VERB_KEYS: &[&str] = &["get", "post", "put", "patch", "delete"];

/// The output of one compilation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    /// Capability table in compile order.
    pub capabilities: Vec<Capability>,
    /// `info.description` from the document, for the manifest.
    pub description: Option<String>,
}

/// Compile a parsed OpenAPI 3.x document into a capability table.
pub fn compile(spec: &Value) -> Result<Compiled, CompileError> {
    let paths = spec.get("paths").ok_or(CompileError::MissingPaths)?;
    let paths = paths.as_object().ok_or(CompileError::PathsNotObject)?;
    if paths.is_empty() {
        return Err(CompileError::NoOperations);
    }
    if paths.len() > MAX_SPEC_PATHS {
        return Err(CompileError::TooManyPaths {
            count: paths.len(),
            max: MAX_SPEC_PATHS,
        });
    }

    let mut capabilities = Vec::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for verb in VERB_KEYS {
            let Some(operation) = item.get(*verb) else {
                continue;
            };
            let Some(method) = HttpMethod::from_spec_key(verb) else {
                continue;
            };
            let name = operation
                .get("operationId")
                .and_then(Value::as_str)
                .filter(|id| name_is_routable(id))
                .map(str::to_string)
                .unwrap_or_else(|| derive_name(method, path));
            let params = merge_params(operation, method);
            let requires_session = operation
                .get("x-requires-session")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            capabilities.push(Capability {
                name,
                method,
                path_template: path.clone(),
                params,
                requires_session,
            });
        }
    }

    if capabilities.is_empty() {
        return Err(CompileError::NoOperations);
    }

    let description = spec
        .get("info")
        .and_then(|info| info.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string);

    debug!(count = capabilities.len(), "Compiled capability table");
    Ok(Compiled {
        capabilities,
        description,
    })
}

/// Only names that mount as literal route segments are taken verbatim; an
/// `operationId` carrying route metacharacters falls back to derivation.
fn name_is_routable(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Stable fallback name for operations without an `operationId`:
/// `method_path` with non-alphanumerics collapsed to single underscores and
/// the ends trimmed.
fn derive_name(method: HttpMethod, path: &str) -> String {
    let raw = format!("{}_{}", method.as_str().to_ascii_lowercase(), path);
    let mut name = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
            last_was_sep = false;
        } else if !last_was_sep && !name.is_empty() {
            name.push('_');
            last_was_sep = true;
        }
    }
    while name.ends_with('_') {
        name.pop();
    }
    name
}

/// Merge declared parameters: `parameters` entries with `in` of query or
/// path, plus — for verbs that carry a body — the JSON body schema's
/// `properties`.
fn merge_params(operation: &Value, method: HttpMethod) -> BTreeMap<String, ParamSpec> {
    let mut params = BTreeMap::new();

    if let Some(declared) = operation.get("parameters").and_then(Value::as_array) {
        for entry in declared {
            let location = entry.get("in").and_then(Value::as_str).unwrap_or("");
            if location != "query" && location != "path" {
                continue;
            }
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let schema = entry.get("schema").unwrap_or(&Value::Null);
            let required = location == "path"
                || entry.get("required").and_then(Value::as_bool).unwrap_or(false);
            params.insert(name.to_string(), param_spec(schema, required));
        }
    }

    if !method.is_bodyless()
        && let Some(schema) = operation
            .get("requestBody")
            .and_then(|b| b.get("content"))
            .and_then(|c| c.get("application/json"))
            .and_then(|j| j.get("schema"))
    {
        let required_names: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in properties {
                let required = required_names.contains(&name.as_str());
                params.insert(name.clone(), param_spec(prop, required));
            }
        }
    }

    params
}

fn param_spec(schema: &Value, required: bool) -> ParamSpec {
    ParamSpec {
        param_type: schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("string")
            .to_string(),
        required,
        allowed: schema
            .get("enum")
            .and_then(Value::as_array)
            .map(|values| values.to_vec()),
        default: schema.get("default").cloned(),
    }
}
