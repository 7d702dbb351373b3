//! Typing metadata attached to graph nodes.
//!
//! A [`Schema`] is a JSON-schema-like document. Only a handful of keys are
//! interpreted here (`type`, `properties`, `patternProperties`,
//! `additionalProperties`, `items` and the `$error` annotation); everything
//! else is carried through untouched for the consumers of the typing report.

use crate::Value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Json);

impl Schema {
    /// The permissive schema, accepts anything
    pub fn any() -> Self {
        Schema(Json::Object(Map::new()))
    }

    pub fn of_type(name: &str) -> Self {
        Schema(json!({ "type": name }))
    }

    pub fn element() -> Self {
        Self::of_type("element")
    }

    pub fn view(props: Option<&Json>) -> Self {
        match props {
            Some(props) => Schema(json!({ "type": "view", "properties": props })),
            None => Self::of_type("view"),
        }
    }

    /// Permissive schema carrying an error annotation
    pub fn error(message: impl Into<String>) -> Self {
        Schema(json!({ "$error": message.into() }))
    }

    pub fn array_of(items: Vec<Schema>) -> Self {
        Schema(json!({
            "type": "array",
            "items": items.into_iter().map(|s| s.0).collect::<Vec<_>>(),
        }))
    }

    pub fn object_of<'a>(properties: impl IntoIterator<Item = (&'a str, Schema)>) -> Self {
        let properties: Map<String, Json> = properties
            .into_iter()
            .map(|(name, schema)| (name.to_string(), schema.0))
            .collect();
        Schema(json!({ "type": "object", "properties": properties }))
    }

    /// Schema deduced from a literal value
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::of_type("string"),
            Value::Number(_) => Self::of_type("number"),
            Value::Bool(_) => Self::of_type("boolean"),
            Value::Object(_) | Value::Null => Self::of_type("object"),
            Value::Array(_) => Self::of_type("array"),
            Value::Element(_) => Self::element(),
            Value::Component(_) => Self::view(None),
            Value::Invalid | Value::Undefined => Self::any(),
        }
    }

    pub fn from_json(json: Json) -> Self {
        Schema(json)
    }

    pub fn as_json(&self) -> &Json {
        &self.0
    }

    pub fn into_json(self) -> Json {
        self.0
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.get("type").and_then(Json::as_str)
    }

    /// The `$ref` of a schema that must be downloaded before use
    pub fn reference(&self) -> Option<&str> {
        self.0.get("$ref").and_then(Json::as_str)
    }

    pub fn error_message(&self) -> Option<String> {
        self.0.get("$error").map(|e| match e {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn has_error(&self) -> bool {
        self.0.get("$error").is_some()
    }

    /// Attach an `$error` annotation, keeping the rest of the schema
    pub fn with_error(self, message: impl Into<String>) -> Self {
        let mut map = match self.0 {
            Json::Object(map) => map,
            _ => Map::new(),
        };
        map.insert("$error".to_string(), Json::String(message.into()));
        Schema(Json::Object(map))
    }

    /// Typing of a named property: declared properties first, then
    /// pattern properties, then `additionalProperties`.
    pub fn property(&self, name: &str) -> Schema {
        if let Some(typing) = self.0.get("properties").and_then(|p| p.get(name)) {
            return Schema(typing.clone());
        }

        if let Some(Json::Object(patterns)) = self.0.get("patternProperties") {
            for (pattern, typing) in patterns {
                if pattern_matches(pattern, name) {
                    return Schema(typing.clone());
                }
            }
        }

        if self.has_error() {
            return Schema::error("Cannot determine the type");
        }

        match self.0.get("additionalProperties") {
            Some(typing @ Json::Object(_)) => Schema(typing.clone()),
            _ => Schema::any(),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::any()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Json> for Schema {
    fn from(json: Json) -> Self {
        Schema(json)
    }
}

/// Minimal pattern support for `patternProperties`: `^` and `$` anchors
/// around a literal, or `.*` for anything.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == ".*" || pattern.is_empty() {
        return true;
    }
    let anchored_start = pattern.starts_with('^');
    let anchored_end = pattern.ends_with('$') && pattern.len() > 1;
    let core = pattern.trim_start_matches('^').trim_end_matches('$');
    let (prefix, suffix) = match core.split_once(".*") {
        Some((prefix, suffix)) => (prefix, Some(suffix)),
        None => (core, None),
    };
    match suffix {
        Some(suffix) => {
            let starts = if anchored_start {
                name.starts_with(prefix)
            } else {
                name.contains(prefix)
            };
            let ends = if anchored_end { name.ends_with(suffix) } else { name.contains(suffix) };
            starts && ends
        }
        None => match (anchored_start, anchored_end) {
            (true, true) => name == prefix,
            (true, false) => name.starts_with(prefix),
            (false, true) => name.ends_with(prefix),
            (false, false) => name.contains(prefix),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_lookup_order() {
        let schema = Schema::from(json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "patternProperties": { "^on.*": { "type": "function" } },
            "additionalProperties": { "type": "number" },
        }));

        assert_eq!(schema.property("a"), Schema::of_type("string"));
        assert_eq!(schema.property("onClick"), Schema::of_type("function"));
        assert_eq!(schema.property("other"), Schema::of_type("number"));
        assert_eq!(Schema::any().property("x"), Schema::any());
    }

    #[test]
    fn errors_are_not_deducible() {
        let schema = Schema::error("Module failed");
        assert!(schema.property("x").has_error());
        assert_eq!(
            Schema::of_type("string").with_error("oops").error_message().as_deref(),
            Some("oops")
        );
    }
}
