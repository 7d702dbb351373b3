use crate::context::{ContextId, ExecutionContext};
use crate::program::Program;
use indexmap::IndexMap;
use std::sync::Arc;
use tidecore::{RuntimeError, Value};

/// A program together with the contexts mounted on it.
///
/// Rebuilding the program from an edited descriptor and calling
/// [`LiveProgram::switch_program`] migrates every context in place.
#[derive(Debug)]
pub struct LiveProgram {
    program: Arc<Program>,
    contexts: IndexMap<ContextId, ExecutionContext>,
}

impl LiveProgram {
    pub fn new(program: Arc<Program>) -> Self {
        Self {
            program,
            contexts: IndexMap::new(),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Mount a new context
    pub fn create_context(&mut self, props: Value) -> ContextId {
        self.insert(self.program.create_context(props))
    }

    /// Mount a new context reporting its result changes
    pub fn create_context_with(
        &mut self,
        props: Value,
        on_change: impl FnMut(&Value) + Send + 'static,
    ) -> ContextId {
        self.insert(self.program.create_context(props).with_on_change(on_change))
    }

    fn insert(&mut self, context: ExecutionContext) -> ContextId {
        let id = context.id();
        self.contexts.insert(id, context);
        tracing::debug!("Mounted context {} ({} live)", id, self.contexts.len());
        id
    }

    pub fn context(&self, id: ContextId) -> Option<&ExecutionContext> {
        self.contexts.get(&id)
    }

    pub fn context_mut(&mut self, id: ContextId) -> Option<&mut ExecutionContext> {
        self.contexts.get_mut(&id)
    }

    pub fn update(&mut self, id: ContextId, props: Value) -> Result<(), RuntimeError> {
        self.contexts
            .get_mut(&id)
            .ok_or(RuntimeError::UnknownContext(id))?
            .update(props);
        Ok(())
    }

    pub fn read(&self, id: ContextId) -> Result<Value, RuntimeError> {
        self.contexts
            .get(&id)
            .ok_or(RuntimeError::UnknownContext(id))?
            .read()
    }

    /// Unmount a context
    pub fn dispose_context(&mut self, id: ContextId) -> Result<(), RuntimeError> {
        self.contexts
            .shift_remove(&id)
            .ok_or(RuntimeError::UnknownContext(id))?;
        tracing::debug!("Disposed context {} ({} live)", id, self.contexts.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn context_ids(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.keys().copied()
    }

    /// Replace the program, migrating every live context to it
    pub fn switch_program(&mut self, program: Arc<Program>) {
        tracing::debug!(
            "Switching program '{}' for {} live context(s)",
            program.name(),
            self.contexts.len()
        );
        for context in self.contexts.values_mut() {
            context.switch_program(Arc::clone(&program));
        }
        self.program = program;
    }

    /// Re-read module exports in every live context
    pub fn refresh(&mut self) {
        for context in self.contexts.values_mut() {
            context.refresh_modules();
        }
    }
}
