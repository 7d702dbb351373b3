use serde_json::{Map, Value as Json};
use tidecore::{BuildError, OperatorDesc, Schema, Value};
use tideruntime::{
    Graph, ModelMetadata, NodeId, Operator, OperatorModel, ProgramBuilder, UseLabel, ValueReader,
};

/// A component paired with its props
#[derive(Debug)]
pub struct Element {
    component: NodeId,
    props: NodeId,
}

impl Operator for Element {
    fn title(&self) -> String {
        "Element".to_string()
    }

    fn inputs(&self) -> Vec<(NodeId, UseLabel)> {
        vec![(self.component, UseLabel::View), (self.props, UseLabel::Props)]
    }

    fn evaluate(&self, reader: &dyn ValueReader) -> Value {
        Value::element(reader.read(self.component), reader.read(self.props))
    }

    fn typing(&self, _graph: &Graph) -> Option<Schema> {
        Some(Schema::element())
    }
}

/// `{ "type": "element", "view": value, "props": { name: value, ... } }`
///
/// The view is usually a module reference or a nested program; the props
/// are built as a collection.
pub struct ElementModel;

impl OperatorModel for ElementModel {
    fn name(&self) -> &str {
        "element"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let component = match desc.value("view")? {
            Some(view) => builder.build_value(&view)?,
            None => builder.build_constant(Value::Undefined),
        };

        let values = desc
            .field("props")
            .cloned()
            .unwrap_or_else(|| Json::Object(Map::new()));
        let props =
            builder.build_operator(OperatorDesc::new("collection").with_field("values", values))?;

        Ok(builder.add_operator(Box::new(Element { component, props })))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Component instance with its props".to_string(),
            category: "view".to_string(),
        }
    }
}
