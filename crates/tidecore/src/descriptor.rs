use crate::{BuildError, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Prefix of references resolved through the module registry
pub const MODULE_PREFIX: &str = "module:";

/// One node of a program descriptor, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDesc {
    /// A string, number, boolean or null
    Literal(Value),
    /// `{ "$ref": path }`
    Ref(String),
    /// `{ "type": tag, ... }`
    Operator(OperatorDesc),
}

impl ValueDesc {
    /// Classify a JSON descriptor. Arrays and objects that carry neither
    /// `type` nor `$ref` are malformed.
    pub fn parse(json: &Json) -> Result<Self, BuildError> {
        match json {
            Json::Object(fields) => {
                if let Some(tag) = fields.get("type").and_then(Json::as_str) {
                    Ok(ValueDesc::Operator(OperatorDesc {
                        kind: tag.to_string(),
                        fields: fields.clone(),
                    }))
                } else if let Some(path) = fields.get("$ref").and_then(Json::as_str) {
                    Ok(ValueDesc::Ref(path.to_string()))
                } else {
                    Err(BuildError::Malformed(format!(
                        "expected a literal, a $ref or a typed operator, got {}",
                        json
                    )))
                }
            }
            Json::Array(_) => Err(BuildError::Malformed(format!(
                "bare arrays are not values, use a 'list' operator: {}",
                json
            ))),
            literal => Ok(ValueDesc::Literal(Value::from(literal))),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ValueDesc::Literal(value.into())
    }

    pub fn reference(path: impl Into<String>) -> Self {
        ValueDesc::Ref(path.into())
    }
}

impl TryFrom<&Json> for ValueDesc {
    type Error = BuildError;

    fn try_from(json: &Json) -> Result<Self, Self::Error> {
        ValueDesc::parse(json)
    }
}

/// An operator object `{ "type": tag, ...fields }`
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDesc {
    kind: String,
    fields: Map<String, Json>,
}

impl OperatorDesc {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let mut fields = Map::new();
        fields.insert("type".to_string(), Json::String(kind.clone()));
        Self { kind, fields }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Json) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// The catalog tag
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn field(&self, name: &str) -> Option<&Json> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Json::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Json::as_bool)
    }

    /// Parse a nested value descriptor; a missing field is `None`.
    pub fn value(&self, name: &str) -> Result<Option<ValueDesc>, BuildError> {
        self.fields.get(name).map(ValueDesc::parse).transpose()
    }

    /// Parse an array field of value descriptors; missing means empty.
    pub fn items(&self, name: &str) -> Result<Vec<ValueDesc>, BuildError> {
        match self.fields.get(name) {
            None | Some(Json::Null) => Ok(Vec::new()),
            Some(Json::Array(items)) => items.iter().map(ValueDesc::parse).collect(),
            Some(other) => Err(BuildError::Malformed(format!(
                "'{}' of '{}' must be an array, got {}",
                name, self.kind, other
            ))),
        }
    }

    /// Parse an object field of named value descriptors, keeping key order.
    pub fn entries(&self, name: &str) -> Result<IndexMap<String, ValueDesc>, BuildError> {
        match self.fields.get(name) {
            None | Some(Json::Null) => Ok(IndexMap::new()),
            Some(Json::Object(entries)) => entries
                .iter()
                .map(|(key, desc)| Ok((key.clone(), ValueDesc::parse(desc)?)))
                .collect(),
            Some(other) => Err(BuildError::Malformed(format!(
                "'{}' of '{}' must be an object, got {}",
                name, self.kind, other
            ))),
        }
    }

    pub fn to_json(&self) -> Json {
        Json::Object(self.fields.clone())
    }
}

/// Program flavour; both build the same scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramKind {
    Program,
    Component,
}

/// Root descriptor `{ type: "program" | "component", props, result }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDesc {
    #[serde(rename = "type")]
    pub kind: ProgramKind,

    /// Scope name; references address the scope props as `<name>/...`
    #[serde(default)]
    pub name: String,

    /// JSON schema of the props
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Json>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
}

impl ProgramDesc {
    pub fn new(result: Json) -> Self {
        Self {
            kind: ProgramKind::Program,
            name: String::new(),
            props: None,
            result: Some(result),
        }
    }

    pub fn with_props(mut self, schema: Json) -> Self {
        self.props = Some(schema);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn from_json(json: &Json) -> Result<Self, BuildError> {
        serde_json::from_value(json.clone())
            .map_err(|e| BuildError::InvalidProgram(e.to_string()))
    }

    pub fn from_operator(desc: &OperatorDesc) -> Result<Self, BuildError> {
        Self::from_json(&desc.to_json())
    }

    /// The result descriptor, `None` when absent.
    pub fn result_desc(&self) -> Result<Option<ValueDesc>, BuildError> {
        self.result.as_ref().map(ValueDesc::parse).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_descriptor_shapes() {
        assert_eq!(ValueDesc::parse(&json!("hi")).unwrap(), ValueDesc::literal("hi"));
        assert_eq!(ValueDesc::parse(&json!(null)).unwrap(), ValueDesc::Literal(Value::Null));
        assert_eq!(
            ValueDesc::parse(&json!({ "$ref": "/x/a" })).unwrap(),
            ValueDesc::reference("/x/a")
        );
        match ValueDesc::parse(&json!({ "type": "list", "items": [] })).unwrap() {
            ValueDesc::Operator(op) => assert_eq!(op.kind(), "list"),
            other => panic!("expected operator, got {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            ValueDesc::parse(&json!({ "value": 1 })),
            Err(BuildError::Malformed(_))
        ));
        assert!(matches!(ValueDesc::parse(&json!([1, 2])), Err(BuildError::Malformed(_))));
    }

    #[test]
    fn program_descriptor_defaults() {
        let desc = ProgramDesc::from_json(&json!({ "type": "component", "result": 1 })).unwrap();
        assert_eq!(desc.kind, ProgramKind::Component);
        assert_eq!(desc.name, "");
        assert!(desc.props.is_none());
        assert_eq!(desc.result_desc().unwrap(), Some(ValueDesc::literal(1)));
    }
}
