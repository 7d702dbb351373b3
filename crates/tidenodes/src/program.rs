use tidecore::{BuildError, OperatorDesc, ProgramDesc};
use tideruntime::{ModelMetadata, NodeId, OperatorModel, ProgramBuilder};
use tracing::debug;

/// `{ "type": "program" | "component", "props": schema, "result": value }`
///
/// Builds a separate program and yields it as a component value.
pub struct ProgramModel {
    tag: &'static str,
}

impl ProgramModel {
    pub fn program() -> Self {
        Self { tag: "program" }
    }

    pub fn component() -> Self {
        Self { tag: "component" }
    }
}

impl OperatorModel for ProgramModel {
    fn name(&self) -> &str {
        self.tag
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let program = ProgramDesc::from_operator(desc)?;
        debug!("Building nested {} '{}'", self.tag, program.name);
        builder.build_component(&program)
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Program exported as a component".to_string(),
            category: "program".to_string(),
        }
    }
}

/// `{ "type": "inline", "name": scope, "result": value }`
///
/// A nested scope reading its parent's props by reference; references to
/// enclosing values go through bridges.
pub struct InlineModel;

impl OperatorModel for InlineModel {
    fn name(&self) -> &str {
        "inline"
    }

    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let name = desc.str_field("name").unwrap_or_default();
        let result = desc.value("result")?;
        builder.build_inline(name, result.as_ref())
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            description: "Nested scope sharing the enclosing props".to_string(),
            category: "program".to_string(),
        }
    }
}
