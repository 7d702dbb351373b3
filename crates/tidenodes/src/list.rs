use tidecore::{BuildError, EvalError, OperatorDesc, Schema, Value};
use tideruntime::{
    Catalog, Graph, ModelMetadata, NodeId, Operator, OperatorModel, ProgramBuilder, UseLabel,
    ValueReader,
};

/// Array of the values of its items
#[derive(Debug)]
pub struct List {
    items: Vec<NodeId>,
}

impl Operator for List {
    fn title(&self) -> String {
        "[ ]".to_string()
    }

    fn inputs(&self) -> Vec<(NodeId, UseLabel)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (*item, UseLabel::Item(i)))
            .collect()
    }

    fn evaluate(&self, reader: &dyn ValueReader) -> Value {
        Value::array(self.items.iter().map(|item| reader.read(*item)).collect())
    }

    fn typing(&self, graph: &Graph) -> Option<Schema> {
        Some(Schema::array_of(
            self.items.iter().map(|item| graph.typing(*item).clone()).collect(),
        ))
    }
}

/// `{ "type": "list", "items": [...] }`
pub struct ListModel;

impl OperatorModel for ListModel {
    fn name(&self) -> &str {
        "list"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let mut items = Vec::new();
        for item in desc.items("items")? {
            items.push(builder.build_value(&item)?);
        }
        Ok(builder.add_operator(Box::new(List { items })))
    }

    fn eval(&self, desc: &OperatorDesc, catalog: &Catalog) -> Result<Value, EvalError> {
        let items = desc
            .items("items")?
            .iter()
            .map(|item| catalog.eval_value(item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::array(items))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Array built from a list of values".to_string(),
            category: "structure".to_string(),
        }
    }
}
