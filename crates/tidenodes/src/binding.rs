use tidecore::{BuildError, OperatorDesc, Schema, Value};
use tideruntime::{
    Graph, ModelMetadata, NodeId, Operator, OperatorModel, ProgramBuilder, UseLabel, ValueReader,
};

/// Reads and writes through to the value its path resolved to
#[derive(Debug)]
pub struct Binding {
    target: NodeId,
}

impl Operator for Binding {
    fn title(&self) -> String {
        ">>".to_string()
    }

    fn inputs(&self) -> Vec<(NodeId, UseLabel)> {
        vec![(self.target, UseLabel::Value)]
    }

    fn evaluate(&self, reader: &dyn ValueReader) -> Value {
        reader.read(self.target)
    }

    fn typing(&self, graph: &Graph) -> Option<Schema> {
        Some(graph.typing(self.target).clone())
    }

    fn write_target(&self) -> Option<NodeId> {
        Some(self.target)
    }
}

/// `{ "type": "bind", "path": "/x/a" }`
pub struct BindingModel;

impl OperatorModel for BindingModel {
    fn name(&self) -> &str {
        "bind"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let path = desc
            .str_field("path")
            .ok_or_else(|| BuildError::Malformed("'bind' requires a string 'path'".to_string()))?;
        let target = builder.resolve_ref(path);
        Ok(builder.add_operator(Box::new(Binding { target })))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Two-way binding to a referenced value".to_string(),
            category: "source".to_string(),
        }
    }
}
