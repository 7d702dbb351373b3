use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;
use std::sync::Arc;

/// Ordered property map used by object values
pub type Object = IndexMap<String, Value>;

/// Something an element can be instantiated from: a host primitive or a
/// compiled program exported as a component.
pub trait Component: fmt::Debug + Send + Sync {
    /// Display name of the component
    fn name(&self) -> &str;

    /// Produce the component output for the given props
    fn render(&self, props: &Value) -> Value;
}

/// A component paired with the props it should be instantiated with
#[derive(Debug, Clone)]
pub struct Element {
    pub component: Value,
    pub props: Value,
}

impl Element {
    pub fn new(component: Value, props: Value) -> Self {
        Self { component, props }
    }

    /// Render the element when its component is a [`Component`] value.
    pub fn expand(&self) -> Option<Value> {
        match &self.component {
            Value::Component(component) => Some(component.render(&self.props)),
            _ => None,
        }
    }
}

/// Dynamic value flowing through the dataflow graph.
///
/// Containers are shared behind `Arc`, so two values are the *same* (see
/// [`Value::same`]) when they point at the same container, independently of
/// their content. Scalars compare by value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Slot not computed yet
    Invalid,
    /// Absence of a value
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<Object>),
    Element(Arc<Element>),
    Component(Arc<dyn Component>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    pub fn object(props: Object) -> Self {
        Value::Object(Arc::new(props))
    }

    pub fn element(component: Value, props: Value) -> Self {
        Value::Element(Arc::new(Element::new(component, props)))
    }

    /// Identity comparison used for change detection.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Invalid, Value::Invalid) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Element(a), Value::Element(b)) => Arc::ptr_eq(a, b),
            (Value::Component(a), Value::Component(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Value::Invalid)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(props) => Some(props),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Value::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Read a named property, `Undefined` when the base has no such field.
    pub fn field(&self, name: &str) -> Value {
        match self {
            Value::Object(props) => props.get(name).cloned().unwrap_or_default(),
            Value::Array(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default(),
            Value::Element(element) => match name {
                "component" => element.component.clone(),
                "props" => element.props.clone(),
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Invalid => "invalid",
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Element(_) => "element",
            Value::Component(_) => "component",
        }
    }

    /// Convert to plain JSON. Integral numbers are emitted as integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Invalid | Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(props) => serde_json::Value::Object(
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Element(element) => serde_json::json!({
                "$element": {
                    "component": element.component.to_json(),
                    "props": element.props.to_json(),
                }
            }),
            Value::Component(component) => serde_json::json!({ "$component": component.name() }),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Structural equality; use [`Value::same`] for change detection.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Element(a), Value::Element(b)) => {
                a.component == b.component && a.props == b.props
            }
            _ => self.same(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Invalid => f.write_str("<invalid>"),
            Value::Undefined => f.write_str("undefined"),
            _ => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Invalid | Value::Undefined | Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => number_to_json(*n).serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(props) => {
                let mut map = serializer.serialize_map(Some(props.len()))?;
                for (key, value) in props.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Element(_) | Value::Component(_) => self.to_json().serialize(serializer),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Object> for Value {
    fn from(props: Object) -> Self {
        Value::object(props)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from(&json)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from).collect())
            }
            serde_json::Value::Object(props) => Value::object(
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::from(json!({ "x": 1 }));
        let b = Value::from(json!({ "x": 1 }));

        assert!(a.same(&a.clone()), "a clone shares the container");
        assert!(!a.same(&b), "equal content in another container is a different value");
        assert_eq!(a, b, "structural equality still holds");
    }

    #[test]
    fn scalars_compare_by_value() {
        assert!(Value::from("hello").same(&Value::string("hello")));
        assert!(Value::from(3.0).same(&Value::from(3)));
        assert!(!Value::Undefined.same(&Value::Invalid));
    }

    #[test]
    fn json_round_trip_keeps_integers() {
        let json = json!({ "a": "hello", "b": 123, "c": [true, null, 1.5] });
        assert_eq!(Value::from(&json).to_json(), json);
    }

    #[test]
    fn field_lookup() {
        let value = Value::from(json!({ "x": { "a": "v1" }, "list": [10, 20] }));
        assert_eq!(value.field("x").field("a"), Value::from("v1"));
        assert_eq!(value.field("list").field("1"), Value::from(20));
        assert!(value.field("missing").is_undefined());
        assert!(Value::from(5).field("x").is_undefined());
    }
}
