//! Incremental execution of a built program.
//!
//! A context holds one value slot per node of its scope, in topological
//! order. Every slot starts `PENDING`; a slot whose value changes marks the
//! slots of its users pending and, when the cursor already went past it,
//! rewinds the cursor. `execute` sweeps forward from the cursor evaluating
//! pending slots only.

use crate::graph::{Graph, NodeId, NodeKind, ScopeId, ValueReader};
use crate::program::Program;
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tidecore::{RuntimeError, Value};
use uuid::Uuid;

pub type ContextId = Uuid;

bitflags! {
    /// Per-slot execution status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u8 {
        /// Value changed during the current pass
        const CHANGED = 0b0000_0001;
        /// Must be evaluated by the next sweep
        const PENDING = 0b0000_0010;
    }
}

type OnChange = Box<dyn FnMut(&Value) + Send>;

/// Slots of the enclosing context, read by bridges
struct ParentView<'a> {
    states: &'a [Value],
    statuses: &'a [StatusFlags],
}

/// Reads node values from the slots of one scope
struct ScopeReader<'a> {
    graph: &'a Graph,
    scope: ScopeId,
    states: &'a [Value],
}

impl ValueReader for ScopeReader<'_> {
    fn read(&self, node: NodeId) -> Value {
        let entry = self.graph.node(node);
        if entry.scope != self.scope {
            // Values owned by another scope that need no slot to be read
            return match &entry.kind {
                NodeKind::Constant(value) => value.clone(),
                NodeKind::Module { entry, .. } => entry.exports(),
                _ => Value::Undefined,
            };
        }
        entry
            .state_id
            .and_then(|slot| self.states.get(slot).cloned())
            .unwrap_or(Value::Undefined)
    }
}

pub struct ExecutionContext {
    id: ContextId,
    program: Arc<Program>,
    scope: ScopeId,
    states: Vec<Value>,
    statuses: Vec<StatusFlags>,
    execution_index: usize,
    children: HashMap<NodeId, ExecutionContext>,
    on_change: Option<OnChange>,
    mounted: bool,
    last_executed: Vec<usize>,
}

impl ExecutionContext {
    /// Mount a program: seed the props slot and execute
    pub fn new(program: Arc<Program>, props: Value) -> Self {
        let mut context = Self::for_scope(program, ScopeId::ROOT);
        context.update(props);
        context.mounted = true;
        context
    }

    fn for_scope(program: Arc<Program>, scope: ScopeId) -> Self {
        let slots = program.graph.scope(scope).states.len();
        let context = Self {
            id: Uuid::new_v4(),
            program,
            scope,
            states: vec![Value::Invalid; slots],
            statuses: vec![StatusFlags::PENDING; slots],
            execution_index: 0,
            children: HashMap::new(),
            on_change: None,
            mounted: false,
            last_executed: Vec::new(),
        };
        tracing::debug!("Created context {} with {} slots", context.id, slots);
        context
    }

    /// Report result changes; the initial mount is not reported
    pub fn with_on_change(mut self, on_change: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(on_change));
        self
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn states(&self) -> &[Value] {
        &self.states
    }

    pub fn execution_index(&self) -> usize {
        self.execution_index
    }

    pub fn status(&self, slot: usize) -> Option<StatusFlags> {
        self.statuses.get(slot).copied()
    }

    /// Slots evaluated by the last `execute`, empty when tracing is off
    pub fn last_executed(&self) -> &[usize] {
        &self.last_executed
    }

    /// Write a slot. Returns whether the value changed; an unchanged value
    /// schedules nothing.
    pub fn set_state(&mut self, index: usize, value: Value) -> Result<bool, RuntimeError> {
        let len = self.states.len();
        let current = self
            .states
            .get_mut(index)
            .ok_or(RuntimeError::SlotOutOfRange { index, len })?;
        if current.same(&value) {
            return Ok(false);
        }
        *current = value;
        self.statuses[index] |= StatusFlags::CHANGED;

        let program = Arc::clone(&self.program);
        let graph = &program.graph;
        let node = graph.scope(self.scope).states[index];
        for used in graph.users(node) {
            let user = graph.node(used.user);
            if user.scope == self.scope {
                if let Some(slot) = user.state_id {
                    self.statuses[slot] |= StatusFlags::PENDING;
                }
            }
        }

        if self.execution_index > index {
            tracing::debug!("Rewinding context {} to slot {}", self.id, index);
            self.execution_index = index;
        }
        tracing::trace!("Slot {} of context {} changed", index, self.id);
        Ok(true)
    }

    /// Evaluate pending slots from the cursor to the end of the order
    pub fn execute(&mut self) {
        self.run(None);
    }

    /// Seed the props slot and execute
    pub fn update(&mut self, props: Value) {
        let slot = self.props_slot();
        if let Some(slot) = slot {
            let _ = self.set_state(slot, props);
        }
        self.execute();
    }

    /// Current result. An undefined result is reported as an error; a
    /// result not computed yet reads as `Value::Invalid`.
    pub fn read(&self) -> Result<Value, RuntimeError> {
        let result = match self.program.graph.scope(self.scope).result {
            Some(result) => self.reader().read(result),
            None => Value::Undefined,
        };
        if result.is_undefined() {
            Err(RuntimeError::UndefinedResult)
        } else {
            Ok(result)
        }
    }

    /// Current value of a node of this context or of a nested scope context
    pub fn value_of(&self, node: NodeId) -> Option<Value> {
        if !self.program.graph.contains(node) {
            return None;
        }
        if self.program.graph.node(node).scope == self.scope {
            return Some(self.reader().read(node));
        }
        self.children.values().find_map(|child| child.value_of(node))
    }

    /// Write a value through a writable node and re-execute.
    ///
    /// Props and local sources take the value directly, fields rebuild their
    /// base object, and operators forward to their write target.
    pub fn assign(&mut self, node: NodeId, value: Value) -> Result<(), RuntimeError> {
        self.write(node, value)?;
        self.execute();
        Ok(())
    }

    fn write(&mut self, node: NodeId, value: Value) -> Result<(), RuntimeError> {
        let program = Arc::clone(&self.program);
        let graph = &program.graph;
        if !graph.contains(node) {
            return Err(RuntimeError::NotWritable(node.raw()));
        }
        let entry = graph.node(node);
        if entry.scope != self.scope {
            return Err(RuntimeError::NotWritable(node.raw()));
        }

        match &entry.kind {
            NodeKind::Props | NodeKind::Local { .. } => {
                let slot = entry.state_id.ok_or(RuntimeError::NotWritable(node.raw()))?;
                self.set_state(slot, value)?;
                Ok(())
            }
            NodeKind::Field { name, source } => {
                let base = self.reader().read(*source);
                let mut object = match base {
                    Value::Object(object) => (*object).clone(),
                    Value::Invalid | Value::Undefined | Value::Null => Default::default(),
                    _ => return Err(RuntimeError::NotWritable(node.raw())),
                };
                object.insert(name.clone(), value);
                self.write(*source, Value::object(object))
            }
            NodeKind::Operator(op) => match op.write_target() {
                Some(target) => self.write(target, value),
                None => Err(RuntimeError::NotWritable(node.raw())),
            },
            _ => Err(RuntimeError::NotWritable(node.raw())),
        }
    }

    /// Re-read module exports, for modules that finished loading after
    /// the context was mounted
    pub fn refresh_modules(&mut self) {
        self.mark_module_users();
        self.execute();
    }

    fn mark_module_users(&mut self) {
        let program = Arc::clone(&self.program);
        let graph = &program.graph;
        let is_module = |id: NodeId| matches!(graph.node(id).kind, NodeKind::Module { .. });

        for (slot, node) in graph.scope(self.scope).states.iter().enumerate() {
            let reads_module = is_module(*node)
                || matches!(graph.node(*node).kind, NodeKind::Inline { .. })
                || graph.inputs(*node).iter().any(|(input, _)| is_module(*input));
            if reads_module {
                self.statuses[slot] |= StatusFlags::PENDING;
                self.execution_index = self.execution_index.min(slot);
            }
        }
        for child in self.children.values_mut() {
            child.mark_module_users();
        }
    }

    /// Move the context onto a rebuilt program, keeping its identity and
    /// its current props
    pub fn switch_program(&mut self, program: Arc<Program>) {
        let props = self
            .props_slot()
            .and_then(|slot| self.states.get(slot).cloned())
            .unwrap_or(Value::Invalid);

        let slots = program.graph.scope(ScopeId::ROOT).states.len();
        self.program = program;
        self.scope = ScopeId::ROOT;
        self.states = vec![Value::Invalid; slots];
        self.statuses = vec![StatusFlags::PENDING; slots];
        self.execution_index = 0;
        self.children.clear();
        tracing::debug!("Context {} switched to a program with {} slots", self.id, slots);

        self.update(props);
    }

    fn props_slot(&self) -> Option<usize> {
        let graph = &self.program.graph;
        graph.node(graph.scope(self.scope).props).state_id
    }

    fn reader(&self) -> ScopeReader<'_> {
        ScopeReader {
            graph: &self.program.graph,
            scope: self.scope,
            states: &self.states,
        }
    }

    fn run(&mut self, parent: Option<&ParentView<'_>>) {
        let trace = self.program.trace_execution;
        if trace {
            self.last_executed.clear();
        }

        while self.execution_index < self.states.len() {
            let index = self.execution_index;
            if self.statuses[index].contains(StatusFlags::PENDING) {
                self.statuses[index].remove(StatusFlags::PENDING);
                if trace {
                    self.last_executed.push(index);
                }
                self.execute_slot(index, parent);
            }
            if self.execution_index == index {
                self.execution_index += 1;
            }
        }

        for status in &mut self.statuses {
            status.remove(StatusFlags::CHANGED);
        }
    }

    fn execute_slot(&mut self, index: usize, parent: Option<&ParentView<'_>>) {
        let program = Arc::clone(&self.program);
        let graph = &program.graph;
        let node = graph.scope(self.scope).states[index];

        let value = match &graph.node(node).kind {
            NodeKind::Props => return,
            NodeKind::Local { initial } => {
                if !self.states[index].is_invalid() {
                    return;
                }
                initial.clone()
            }
            NodeKind::Constant(value) => value.clone(),
            NodeKind::Field { name, source } => self.reader().read(*source).field(name),
            NodeKind::Bridge { source } => {
                let slot = graph.node(*source).state_id;
                match (parent, slot) {
                    (Some(parent), Some(slot)) => {
                        parent.states.get(slot).cloned().unwrap_or(Value::Undefined)
                    }
                    _ => Value::Undefined,
                }
            }
            NodeKind::Module { entry, .. } => entry.exports(),
            NodeKind::Inline { scope } => self.execute_inline(node, *scope),
            NodeKind::Component { value } => value.clone(),
            NodeKind::Output { result } => self.reader().read(*result),
            NodeKind::Undefined { .. } | NodeKind::Bad { .. } => Value::Undefined,
            NodeKind::Operator(op) => op.evaluate(&self.reader()),
        };

        let is_output = matches!(graph.node(node).kind, NodeKind::Output { .. });
        let changed = matches!(self.set_state(index, value), Ok(true));
        if changed && is_output && self.mounted {
            let result = self.states[index].clone();
            if let Some(on_change) = self.on_change.as_mut() {
                on_change(&result);
            }
        }
    }

    /// Run the nested scope owned by `node` against this context
    fn execute_inline(&mut self, node: NodeId, scope: ScopeId) -> Value {
        let props = self
            .props_slot()
            .and_then(|slot| self.states.get(slot).cloned())
            .unwrap_or(Value::Invalid);

        let mut child = match self.children.remove(&node) {
            Some(child) => child,
            None => Self::for_scope(Arc::clone(&self.program), scope),
        };
        {
            let view = ParentView {
                states: &self.states,
                statuses: &self.statuses,
            };
            child.run_inline(props, &view);
        }
        let result = child.read().unwrap_or_default();
        self.children.insert(node, child);
        result
    }

    fn run_inline(&mut self, props: Value, parent: &ParentView<'_>) {
        if let Some(slot) = self.props_slot() {
            let _ = self.set_state(slot, props);
        }

        let program = Arc::clone(&self.program);
        let graph = &program.graph;
        for (slot, node) in graph.scope(self.scope).states.iter().enumerate() {
            if let NodeKind::Bridge { source } = graph.node(*node).kind {
                let source_changed = graph
                    .node(source)
                    .state_id
                    .and_then(|s| parent.statuses.get(s))
                    .is_some_and(|status| status.contains(StatusFlags::CHANGED));
                if source_changed {
                    self.statuses[slot] |= StatusFlags::PENDING;
                    self.execution_index = self.execution_index.min(slot);
                }
            }
        }

        self.run(Some(parent));
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("program", &self.program.name)
            .field("states", &self.states)
            .field("execution_index", &self.execution_index)
            .finish()
    }
}
