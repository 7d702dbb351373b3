use tidecore::{BuildError, EvalError, OperatorDesc, Value};
use tideruntime::{Catalog, ModelMetadata, NodeId, OperatorModel, ProgramBuilder};

/// `{ "type": "constant", "value": literal }`
pub struct ConstantModel;

impl OperatorModel for ConstantModel {
    fn name(&self) -> &str {
        "constant"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        Ok(builder.build_constant(literal(desc)))
    }

    fn eval(&self, desc: &OperatorDesc, _catalog: &Catalog) -> Result<Value, EvalError> {
        Ok(literal(desc))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Literal value, stored as is".to_string(),
            category: "source".to_string(),
        }
    }
}

/// `{ "type": "local", "value": initial }`, a writable cell
pub struct LocalModel;

impl OperatorModel for LocalModel {
    fn name(&self) -> &str {
        "local"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        Ok(builder.build_local(literal(desc)))
    }

    fn eval(&self, desc: &OperatorDesc, _catalog: &Catalog) -> Result<Value, EvalError> {
        Ok(literal(desc))
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Writable value holding its initial value until assigned".to_string(),
            category: "source".to_string(),
        }
    }
}

fn literal(desc: &OperatorDesc) -> Value {
    desc.field("value").map(Value::from).unwrap_or(Value::Null)
}
