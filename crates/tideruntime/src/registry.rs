use crate::builder::ProgramBuilder;
use crate::graph::NodeId;
use std::collections::HashMap;
use std::sync::Arc;
use tidecore::{BuildError, EvalError, OperatorDesc, Value, ValueDesc};

/// Catalog entry turning an operator descriptor into graph nodes
pub trait OperatorModel: Send + Sync {
    /// Descriptor `type` tag handled by this model (e.g. "list", "collection")
    fn name(&self) -> &str;

    /// Build the node for a descriptor, wiring its inputs through the builder
    fn build(
        &self,
        desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError>;

    /// Optional: evaluate the descriptor without building a graph
    fn eval(&self, _desc: &OperatorDesc, _catalog: &Catalog) -> Result<Value, EvalError> {
        Err(EvalError::NotEvaluable(self.name().to_string()))
    }

    /// Optional: describe the operator for tooling
    fn metadata(&self) -> ModelMetadata {
        ModelMetadata::default()
    }
}

/// Metadata about an operator model
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of operator models keyed by descriptor tag
pub struct Catalog {
    models: HashMap<String, Arc<dyn OperatorModel>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Register an operator model, replacing any model with the same tag
    pub fn register(&mut self, model: Arc<dyn OperatorModel>) {
        let name = model.name().to_string();
        tracing::info!("Registering operator: {}", name);
        self.models.insert(name, model);
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn OperatorModel>> {
        self.models.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.models.contains_key(tag)
    }

    /// Get all registered tags, sorted
    pub fn list_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_metadata(&self, tag: &str) -> Option<ModelMetadata> {
        self.models.get(tag).map(|m| m.metadata())
    }

    /// Evaluate a descriptor statically, without building a graph.
    ///
    /// References cannot be evaluated this way since they need a live scope.
    pub fn eval_value(&self, desc: &ValueDesc) -> Result<Value, EvalError> {
        match desc {
            ValueDesc::Literal(value) => Ok(value.clone()),
            ValueDesc::Ref(path) => Err(EvalError::Reference(path.clone())),
            ValueDesc::Operator(op) => {
                let model = self
                    .models
                    .get(op.kind())
                    .ok_or_else(|| EvalError::UnknownType(op.kind().to_string()))?;
                model.eval(op, self)
            }
        }
    }

    pub fn eval_json(&self, desc: &serde_json::Value) -> Result<Value, EvalError> {
        self.eval_value(&ValueDesc::parse(desc)?)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
