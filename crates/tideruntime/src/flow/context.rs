use super::builder::FlowDefinition;
use super::operator::FlowKind;
use bitflags::bitflags;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tidecore::{FlowError, Value};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlowStatus: u8 {
        const SCHEDULED = 0b0000_0001;
    }
}

/// One run of a flow definition.
///
/// Notified operators are queued by index; operators are created after
/// their inputs, so popping the lowest index first evaluates every
/// operator after its dependencies.
#[derive(Debug)]
pub struct FlowContext {
    definition: Arc<FlowDefinition>,
    states: Vec<Value>,
    statuses: Vec<FlowStatus>,
    queue: BinaryHeap<Reverse<usize>>,
}

impl FlowContext {
    /// Every operator starts scheduled
    pub fn new(definition: Arc<FlowDefinition>) -> Self {
        let len = definition.len();
        Self {
            definition,
            states: vec![Value::Undefined; len],
            statuses: vec![FlowStatus::SCHEDULED; len],
            queue: (0..len).map(Reverse).collect(),
        }
    }

    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.definition
    }

    pub fn state(&self, index: usize) -> Option<&Value> {
        self.states.get(index)
    }

    pub fn is_scheduled(&self, index: usize) -> bool {
        self.statuses
            .get(index)
            .is_some_and(|s| s.contains(FlowStatus::SCHEDULED))
    }

    /// Queue an operator; scheduling a queued operator does nothing
    pub fn schedule(&mut self, index: usize) {
        if let Some(status) = self.statuses.get_mut(index) {
            if !status.contains(FlowStatus::SCHEDULED) {
                status.insert(FlowStatus::SCHEDULED);
                self.queue.push(Reverse(index));
            }
        }
    }

    /// Store a value and notify users.
    ///
    /// A new value notifies every user. The same value again is taken as an
    /// in-place mutation and only notifies field and content users. Returns
    /// whether the value changed.
    pub fn set_state(&mut self, index: usize, value: Value) -> Result<bool, FlowError> {
        let definition = Arc::clone(&self.definition);
        let operator = definition
            .operator(index)
            .ok_or(FlowError::UnknownOperator(index))?;

        if value.same(&self.states[index]) {
            tracing::trace!("Flow mutation: {}", operator.identifier());
            for user in operator.mutation_users() {
                self.schedule(*user);
            }
            Ok(false)
        } else {
            tracing::trace!("Flow change: {} = {}", operator.identifier(), value);
            self.states[index] = value;
            for user in operator.users() {
                self.schedule(*user);
            }
            Ok(true)
        }
    }

    /// Notify the users that watch the content of an operator's value
    pub fn notify_mutation(&mut self, index: usize) -> Result<(), FlowError> {
        let current = self
            .states
            .get(index)
            .cloned()
            .ok_or(FlowError::UnknownOperator(index))?;
        self.set_state(index, current)?;
        Ok(())
    }

    /// Drain the queue, lowest index first
    pub fn execute(&mut self) {
        while let Some(Reverse(index)) = self.queue.pop() {
            self.statuses[index].remove(FlowStatus::SCHEDULED);
            self.evaluate(index);
        }
    }

    pub fn set_properties(&mut self, props: Value) {
        let _ = self.set_state(FlowDefinition::PROPS, props);
    }

    /// Set the properties and execute
    pub fn update(&mut self, props: Value) {
        self.set_properties(props);
        self.execute();
    }

    /// Assign a named state and execute
    pub fn set_named_state(&mut self, name: &str, value: Value) -> bool {
        match self.definition.find_state(name) {
            Some(index) => {
                let _ = self.set_state(index, value);
                self.execute();
                true
            }
            None => false,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        self.definition.output().and_then(|index| self.states.get(index))
    }

    fn evaluate(&mut self, index: usize) {
        let definition = Arc::clone(&self.definition);
        let Some(operator) = definition.operator(index) else {
            return;
        };

        let value = match &operator.kind {
            FlowKind::Properties | FlowKind::State { .. } => return,
            FlowKind::Field { name, source } => self.states[*source].field(name),
            FlowKind::Array { items } => {
                Value::array(items.iter().map(|i| self.states[*i].clone()).collect())
            }
            FlowKind::Collection { values } => Value::object(
                values
                    .iter()
                    .map(|(key, i)| (key.clone(), self.states[*i].clone()))
                    .collect(),
            ),
            FlowKind::Element { component, props } => Value::element(
                self.states[*component].clone(),
                self.states[*props].clone(),
            ),
            FlowKind::Constant(value) => value.clone(),
        };
        let _ = self.set_state(index, value);
    }
}
