use indexmap::IndexMap;
use tidecore::{BuildError, EvalError, Object, OperatorDesc, Schema, Value};
use tideruntime::{
    Catalog, Graph, ModelMetadata, NodeId, Operator, OperatorModel, ProgramBuilder, UseLabel,
    ValueReader,
};

/// Object of named values, in declaration order
#[derive(Debug)]
pub struct Collection {
    values: IndexMap<String, NodeId>,
}

impl Operator for Collection {
    fn title(&self) -> String {
        "{ }".to_string()
    }

    fn inputs(&self) -> Vec<(NodeId, UseLabel)> {
        self.values
            .iter()
            .map(|(key, value)| (*value, UseLabel::Property(key.clone())))
            .collect()
    }

    fn evaluate(&self, reader: &dyn ValueReader) -> Value {
        let props: Object = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), reader.read(*value)))
            .collect();
        Value::object(props)
    }

    fn typing(&self, graph: &Graph) -> Option<Schema> {
        Some(Schema::object_of(
            self.values
                .iter()
                .map(|(key, value)| (key.as_str(), graph.typing(*value).clone())),
        ))
    }
}

/// `{ "type": "collection", "values": { name: value, ... } }`
pub struct CollectionModel;

impl OperatorModel for CollectionModel {
    fn name(&self) -> &str {
        "collection"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let mut values = IndexMap::new();
        for (key, value) in desc.entries("values")? {
            values.insert(key, builder.build_value(&value)?);
        }
        Ok(builder.add_operator(Box::new(Collection { values })))
    }

    fn eval(&self, desc: &OperatorDesc, catalog: &Catalog) -> Result<Value, EvalError> {
        let mut props = Object::new();
        for (key, value) in desc.entries("values")? {
            props.insert(key, catalog.eval_value(&value)?);
        }
        Ok(Value::object(props))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Object built from named values".to_string(),
            category: "structure".to_string(),
        }
    }
}
