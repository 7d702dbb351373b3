use super::context::FlowContext;
use super::operator::{FlowKind, FlowOperator};
use indexmap::IndexMap;
use std::sync::Arc;
use tidecore::{FlowError, Value};

/// Finalized operators of a flow, in creation order
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    operators: Vec<FlowOperator>,
    sources: Vec<usize>,
    output: Option<usize>,
}

impl FlowDefinition {
    /// Index of the properties operator
    pub const PROPS: usize = 0;

    fn new() -> Self {
        Self {
            operators: vec![FlowOperator::new(FlowKind::Properties)],
            sources: vec![Self::PROPS],
            output: None,
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn operator(&self, index: usize) -> Option<&FlowOperator> {
        self.operators.get(index)
    }

    pub fn operators(&self) -> &[FlowOperator] {
        &self.operators
    }

    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    pub fn output(&self) -> Option<usize> {
        self.output
    }

    pub fn find_state(&self, name: &str) -> Option<usize> {
        self.sources.iter().copied().find(|i| {
            matches!(&self.operators[*i].kind, FlowKind::State { name: n } if n == name)
        })
    }

    pub fn create_context(self: &Arc<Self>) -> FlowContext {
        FlowContext::new(Arc::clone(self))
    }

    fn push(&mut self, kind: FlowKind) -> usize {
        self.operators.push(FlowOperator::new(kind));
        self.operators.len() - 1
    }

    fn check(&self, index: usize) -> Result<(), FlowError> {
        if index < self.operators.len() {
            Ok(())
        } else {
            Err(FlowError::UnknownOperator(index))
        }
    }

    /// Field of `source`, shared per name
    fn add_field(&mut self, name: &str, source: usize) -> Result<usize, FlowError> {
        self.check(source)?;
        let existing = self.operators[source]
            .field_users()
            .iter()
            .copied()
            .find(|user| {
                matches!(&self.operators[*user].kind, FlowKind::Field { name: n, .. } if n == name)
            });
        if let Some(field) = existing {
            return Ok(field);
        }

        let field = self.push(FlowKind::Field {
            name: name.to_string(),
            source,
        });
        self.operators[source].add_field_user(field, source)?;
        Ok(field)
    }
}

/// Builds a flow definition; operator indices follow creation order
#[derive(Debug)]
pub struct FlowBuilder {
    definition: FlowDefinition,
    constants: Vec<(Value, usize)>,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self {
            definition: FlowDefinition::new(),
            constants: Vec::new(),
        }
    }

    pub fn props(&self) -> usize {
        FlowDefinition::PROPS
    }

    /// Constant operator, shared by identical values
    pub fn get_constant(&mut self, value: Value) -> usize {
        if let Some((_, index)) = self.constants.iter().find(|(v, _)| v.same(&value)) {
            return *index;
        }
        let index = self.definition.push(FlowKind::Constant(value.clone()));
        self.constants.push((value, index));
        index
    }

    pub fn create_array(&mut self, items: Vec<usize>) -> Result<usize, FlowError> {
        for item in &items {
            self.definition.check(*item)?;
        }
        let node = self.definition.push(FlowKind::Array {
            items: items.clone(),
        });
        for item in items {
            self.definition.operators[item].add_value_user(node);
        }
        Ok(node)
    }

    pub fn create_collection(
        &mut self,
        values: IndexMap<String, usize>,
    ) -> Result<usize, FlowError> {
        for item in values.values() {
            self.definition.check(*item)?;
        }
        let items: Vec<usize> = values.values().copied().collect();
        let node = self.definition.push(FlowKind::Collection { values });
        for item in items {
            self.definition.operators[item].add_value_user(node);
        }
        Ok(node)
    }

    /// Element re-created when its component changes or its props change
    /// or are mutated in place
    pub fn create_element(&mut self, component: usize, props: usize) -> Result<usize, FlowError> {
        self.definition.check(component)?;
        self.definition.check(props)?;
        let node = self.definition.push(FlowKind::Element { component, props });
        self.definition.operators[component].add_value_user(node);
        self.definition.operators[props].add_content_user(node);
        Ok(node)
    }

    /// Field of the properties, addressable as a source
    pub fn create_property(&mut self, name: &str) -> Result<usize, FlowError> {
        let node = self.definition.add_field(name, FlowDefinition::PROPS)?;
        if !self.definition.sources.contains(&node) {
            self.definition.sources.push(node);
        }
        Ok(node)
    }

    pub fn create_state(&mut self, name: &str) -> usize {
        let node = self.definition.push(FlowKind::State {
            name: name.to_string(),
        });
        self.definition.sources.push(node);
        node
    }

    /// Source named `name`: a state or a property
    pub fn get_source(&self, name: &str) -> Option<usize> {
        self.definition.sources.iter().copied().find(|i| {
            match &self.definition.operators[*i].kind {
                FlowKind::State { name: n } => n == name,
                FlowKind::Field { name: n, source } => {
                    *source == FlowDefinition::PROPS && n == name
                }
                _ => false,
            }
        })
    }

    /// Resolve `/source/field/...`, creating the fields on the way
    pub fn get_field(&mut self, path: &str) -> Result<Option<usize>, FlowError> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 2 || !parts[0].is_empty() {
            return Ok(None);
        }

        let Some(mut target) = self.get_source(parts[1]) else {
            return Ok(None);
        };
        for part in &parts[2..] {
            target = self.definition.add_field(part, target)?;
        }
        Ok(Some(target))
    }

    pub fn set_output(&mut self, node: usize) -> Result<(), FlowError> {
        self.definition.check(node)?;
        self.definition.output = Some(node);
        Ok(())
    }

    pub fn operator(&self, index: usize) -> Option<&FlowOperator> {
        self.definition.operator(index)
    }

    pub fn finalize(self) -> Arc<FlowDefinition> {
        tracing::debug!("Finalized flow with {} operators", self.definition.len());
        Arc::new(self.definition)
    }
}

impl Default for FlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
