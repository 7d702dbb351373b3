//! One build pass turning a program descriptor into a graph.
//!
//! Building is synchronous: references, fields, bridges and operators are
//! linked as they are met. Typing that needs a download (module definitions,
//! `$ref` props schemas) is collected as waitings on the returned [`Build`];
//! awaiting [`Build::settle`] applies them.

use crate::graph::{Graph, NodeId, NodeKind, Operator, ScopeId, ScopeKind, UseLabel};
use crate::module::{ModuleRegistry, ModuleState};
use crate::program::{Program, ProgramComponent};
use crate::registry::Catalog;
use crate::schema::SchemaFetcher;
use futures::future::{join_all, BoxFuture};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use tidecore::{
    BuildError, Diagnostic, DiagnosticKind, Diagnostics, ModuleError, OperatorDesc, ProgramDesc,
    Schema, Value, ValueDesc, MODULE_PREFIX,
};

/// Outcome of an asynchronous typing resolution
enum Waiting {
    Typing {
        reference: String,
        result: Result<Schema, String>,
    },
    Module {
        node: NodeId,
        result: Result<Schema, ModuleError>,
    },
}

pub struct ProgramBuilder<'a> {
    catalog: &'a Catalog,
    modules: &'a Arc<ModuleRegistry>,
    schemas: Arc<dyn SchemaFetcher>,
    separator: char,
    trace_execution: bool,

    graph: Graph,
    scope: ScopeId,

    module_nodes: HashMap<String, NodeId>,
    fields: HashMap<(NodeId, String), NodeId>,
    bridges: HashMap<(NodeId, ScopeId), NodeId>,

    waitings: Vec<BoxFuture<'static, Waiting>>,
    typings: HashMap<String, Schema>,
    typing_subscribers: HashMap<String, Vec<NodeId>>,

    diagnostics: Diagnostics,
}

impl<'a> ProgramBuilder<'a> {
    pub fn new(catalog: &'a Catalog, modules: &'a Arc<ModuleRegistry>) -> Self {
        let config = modules.config();
        Self {
            catalog,
            modules,
            schemas: Arc::clone(modules.schema_fetcher()),
            separator: config.scope_separator,
            trace_execution: config.trace_execution,
            graph: Graph::new(),
            scope: ScopeId::ROOT,
            module_nodes: HashMap::new(),
            fields: HashMap::new(),
            bridges: HashMap::new(),
            waitings: Vec::new(),
            typings: HashMap::new(),
            typing_subscribers: HashMap::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Build the root scope of a program
    pub fn build(mut self, desc: &ProgramDesc) -> Result<Build, BuildError> {
        let root = self.graph.add_scope(desc.name.clone(), ScopeKind::Program, None);
        self.scope = root;

        let props = self.graph.scope(root).props;
        if let Some(schema) = desc.props.clone().map(Schema::from) {
            match schema.reference().map(str::to_string) {
                Some(reference) => self.require_typing(props, &reference),
                None => self.propagate_typing(props, schema),
            }
        }

        let result = match desc.result_desc()? {
            Some(result) => self.build_value(&result)?,
            None => self.build_constant(Value::Undefined),
        };
        self.graph.scope_mut(root).result = Some(result);

        let output = self.graph.add_node(root, NodeKind::Output { result });
        self.graph.add_use(result, output, UseLabel::Result);
        self.refresh_typing(output);

        self.graph.order_scope(root, &mut self.diagnostics);
        tracing::info!(
            "Built program '{}': {} nodes, {} diagnostics, {} pending typings",
            desc.name,
            self.graph.len(),
            self.diagnostics.len(),
            self.waitings.len()
        );

        let mut modules: Vec<NodeId> = self
            .module_nodes
            .values()
            .copied()
            .filter(|node| matches!(self.graph.node(*node).kind, NodeKind::Module { .. }))
            .collect();
        modules.sort();

        Ok(Build {
            program: Program {
                name: desc.name.clone(),
                graph: self.graph,
                output,
                modules,
                descriptor: desc.clone(),
                diagnostics: self.diagnostics,
                trace_execution: self.trace_execution,
            },
            waitings: self.waitings,
            typing_subscribers: self.typing_subscribers,
            modules: Arc::clone(self.modules),
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn modules(&self) -> &'a Arc<ModuleRegistry> {
        self.modules
    }

    /// Scope nodes are currently created in
    pub fn current_scope(&self) -> ScopeId {
        self.scope
    }

    /// Record a non-fatal build problem
    pub fn error(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Build any value descriptor.
    ///
    /// Unknown operator tags and unresolved references produce stand-in nodes
    /// and a diagnostic; only descriptors malformed below this one fail.
    pub fn build_value(&mut self, desc: &ValueDesc) -> Result<NodeId, BuildError> {
        match desc {
            ValueDesc::Literal(value) => Ok(self.build_constant(value.clone())),
            ValueDesc::Ref(path) => Ok(self.resolve_ref(path)),
            ValueDesc::Operator(op) => {
                let catalog = self.catalog;
                match catalog.get(op.kind()) {
                    Some(model) => {
                        let node = model.build(op, self)?;
                        self.refresh_typing(node);
                        Ok(node)
                    }
                    None => {
                        let message = format!("Value type '{}' is unknown", op.kind());
                        let node = self.graph.add_node(
                            self.scope,
                            NodeKind::Undefined {
                                tag: op.kind().to_string(),
                            },
                        );
                        self.propagate_typing(node, Schema::error(message.clone()));
                        self.error(
                            Diagnostic::new(DiagnosticKind::UnknownType, message).at(node.raw()),
                        );
                        Ok(node)
                    }
                }
            }
        }
    }

    pub fn build_json(&mut self, desc: &Json) -> Result<NodeId, BuildError> {
        let desc = ValueDesc::parse(desc)?;
        self.build_value(&desc)
    }

    pub fn build_operator(&mut self, desc: OperatorDesc) -> Result<NodeId, BuildError> {
        self.build_value(&ValueDesc::Operator(desc))
    }

    pub fn build_constant(&mut self, value: Value) -> NodeId {
        let node = self.graph.add_node(self.scope, NodeKind::Constant(value));
        self.refresh_typing(node);
        node
    }

    /// Writable source holding `initial` until assigned
    pub fn build_local(&mut self, initial: Value) -> NodeId {
        let typing = Schema::of_value(&initial);
        let node = self.graph.add_node(self.scope, NodeKind::Local { initial });
        self.propagate_typing(node, typing);
        node
    }

    /// Add an operator node and link it to its inputs
    pub fn add_operator(&mut self, operator: Box<dyn Operator>) -> NodeId {
        let inputs = operator.inputs();
        let node = self.graph.add_node(self.scope, NodeKind::Operator(operator));
        for (source, label) in inputs {
            self.graph.add_use(source, node, label);
        }
        self.refresh_typing(node);
        node
    }

    pub fn add_use(&mut self, source: NodeId, user: NodeId, label: UseLabel) {
        self.graph.add_use(source, user, label);
    }

    /// Resolve a `$ref` path
    pub fn resolve_ref(&mut self, path: &str) -> NodeId {
        if let Some(id) = path.strip_prefix(MODULE_PREFIX) {
            return self.resolve_module(id);
        }

        let parts: Vec<&str> = path.split(self.separator).collect();
        match self.resolve_scope_ref(&parts, self.scope) {
            Some(node) => node,
            None => {
                let scope = self.scope;
                self.bad_value(scope, path, format!("invalid binding path: {}", path))
            }
        }
    }

    /// Walk the scope chain: the first segment names the scope whose props
    /// the rest of the path reads. Values found in an enclosing scope are
    /// bridged into each scope on the way back.
    fn resolve_scope_ref(&mut self, parts: &[&str], scope: ScopeId) -> Option<NodeId> {
        let (matches, parent, props) = {
            let scope = self.graph.scope(scope);
            (
                parts.first().copied() == Some(scope.name.as_str()),
                scope.parent,
                scope.props,
            )
        };

        if matches {
            let mut current = props;
            for part in parts.iter().skip(1).filter(|p| !p.is_empty()) {
                current = self.resolve_field(current, part);
            }
            return Some(current);
        }

        let value = self.resolve_scope_ref(parts, parent?)?;
        Some(self.resolve_bridge(value, scope))
    }

    /// Field of `base`, shared by every reference to the same `(base, name)`
    pub fn resolve_field(&mut self, base: NodeId, name: &str) -> NodeId {
        if let Some(field) = self.fields.get(&(base, name.to_string())) {
            return *field;
        }

        let scope = self.graph.node(base).scope;
        let field = self.graph.add_node(
            scope,
            NodeKind::Field {
                name: name.to_string(),
                source: base,
            },
        );
        self.graph.add_use(base, field, UseLabel::Source);
        self.refresh_typing(field);
        self.fields.insert((base, name.to_string()), field);
        field
    }

    /// Bridge forwarding `value`, owned by the enclosing scope, into `scope`
    fn resolve_bridge(&mut self, value: NodeId, scope: ScopeId) -> NodeId {
        if let Some(bridge) = self.bridges.get(&(value, scope)) {
            return *bridge;
        }

        let bridge = self.graph.add_node(scope, NodeKind::Bridge { source: value });
        self.graph.add_use(value, bridge, UseLabel::Value);
        if let Some(owner) = self.graph.scope(scope).owner {
            // The owner re-runs the nested scope when a bridged value changes
            self.graph.add_use(value, owner, UseLabel::Value);
        }
        self.refresh_typing(bridge);
        self.bridges.insert((value, scope), bridge);
        tracing::debug!("Bridged {} into scope '{}'", value, self.graph.scope(scope).name);
        bridge
    }

    /// Module node for an id, one per id and builder
    pub fn resolve_module(&mut self, id: &str) -> NodeId {
        if let Some(node) = self.module_nodes.get(id) {
            return *node;
        }

        let entry = self.modules.require_module(id);
        let node = match entry.state() {
            ModuleState::Failed => {
                let reason = entry
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| format!("module '{}' failed", id));
                self.bad_value(ScopeId::ROOT, &format!("{}{}", MODULE_PREFIX, id), reason)
            }
            state => {
                let node = self.graph.add_node(
                    ScopeId::ROOT,
                    NodeKind::Module {
                        reference: id.to_string(),
                        entry: Arc::clone(&entry),
                    },
                );
                match (state, entry.current_definition()) {
                    (ModuleState::Loaded, Some(definition)) => {
                        self.propagate_typing(node, definition)
                    }
                    _ => {
                        let definition = entry.definition();
                        self.waitings.push(Box::pin(async move {
                            Waiting::Module {
                                node,
                                result: definition.await,
                            }
                        }));
                    }
                }
                node
            }
        };
        self.module_nodes.insert(id.to_string(), node);
        node
    }

    /// Nested program sharing the current scope's props
    pub fn build_inline(
        &mut self,
        name: &str,
        result: Option<&ValueDesc>,
    ) -> Result<NodeId, BuildError> {
        let parent = self.scope;
        let scope = self.graph.add_scope(name, ScopeKind::Inline, Some(parent));
        let inline = self.graph.add_node(parent, NodeKind::Inline { scope });
        self.graph.scope_mut(scope).owner = Some(inline);

        let parent_props = self.graph.scope(parent).props;
        self.graph.add_use(parent_props, inline, UseLabel::Argument);
        let props = self.graph.scope(scope).props;
        self.refresh_typing(props);

        self.scope = scope;
        let built = match result {
            Some(result) => self.build_value(result),
            None => Ok(self.build_constant(Value::Undefined)),
        };
        self.scope = parent;
        let result = built?;

        self.graph.scope_mut(scope).result = Some(result);
        self.graph.add_use(result, inline, UseLabel::Result);
        self.graph.order_scope(scope, &mut self.diagnostics);
        self.refresh_typing(inline);
        Ok(inline)
    }

    /// Separately built program, exported as a component value.
    ///
    /// The nested build is not settled: its pending typings are dropped.
    pub fn build_component(&mut self, desc: &ProgramDesc) -> Result<NodeId, BuildError> {
        let program = ProgramBuilder::new(self.catalog, self.modules)
            .build(desc)?
            .into_program();
        let value = Value::Component(Arc::new(ProgramComponent::new(Arc::new(program))));
        let node = self.graph.add_node(self.scope, NodeKind::Component { value });
        self.propagate_typing(node, Schema::view(desc.props.as_ref()));
        Ok(node)
    }

    /// Set a node's typing and update every user's typing
    pub fn propagate_typing(&mut self, node: NodeId, typing: Schema) {
        self.graph.propagate_typing(node, typing);
    }

    /// Recompute a node's typing from its inputs
    pub fn refresh_typing(&mut self, node: NodeId) {
        if let Some(typing) = self.graph.compute_typing(node) {
            self.graph.propagate_typing(node, typing);
        }
    }

    /// Type `node` with the schema named `reference`, downloaded once per
    /// builder
    pub fn require_typing(&mut self, node: NodeId, reference: &str) {
        if let Some(typing) = self.typings.get(reference).cloned() {
            self.propagate_typing(node, typing);
            return;
        }

        let subscribers = self
            .typing_subscribers
            .entry(reference.to_string())
            .or_default();
        subscribers.push(node);
        if subscribers.len() > 1 {
            return;
        }

        let fetcher = Arc::clone(&self.schemas);
        let reference = reference.to_string();
        self.waitings.push(Box::pin(async move {
            let result = fetcher.fetch_schema(&reference).await;
            Waiting::Typing { reference, result }
        }));
    }

    fn bad_value(&mut self, scope: ScopeId, path: &str, message: String) -> NodeId {
        let node = self.graph.add_node(
            scope,
            NodeKind::Bad {
                path: path.to_string(),
            },
        );
        self.propagate_typing(node, Schema::error(message.clone()));
        self.error(Diagnostic::new(DiagnosticKind::UnresolvedReference, message).at(node.raw()));
        node
    }
}

/// A built program whose asynchronous typings may still be in flight
pub struct Build {
    program: Program,
    waitings: Vec<BoxFuture<'static, Waiting>>,
    typing_subscribers: HashMap<String, Vec<NodeId>>,
    modules: Arc<ModuleRegistry>,
}

impl Build {
    /// No typing is left to resolve
    pub fn is_final(&self) -> bool {
        self.waitings.is_empty()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Take the program as built, dropping unresolved typings
    pub fn into_program(self) -> Program {
        if !self.waitings.is_empty() {
            tracing::debug!(
                "Program '{}' finalized with {} unresolved typings",
                self.program.name,
                self.waitings.len()
            );
        }
        self.program
    }

    /// Fetch the modules the build requires, await every typing download
    /// and propagate the results through the graph
    pub async fn settle(mut self) -> Program {
        if self.waitings.is_empty() {
            return self.program;
        }

        self.modules.flush().await;
        let settled = join_all(std::mem::take(&mut self.waitings)).await;
        for waiting in settled {
            self.apply(waiting);
        }
        self.program
    }

    fn apply(&mut self, waiting: Waiting) {
        let program = &mut self.program;
        match waiting {
            Waiting::Typing { reference, result } => {
                let typing = match result {
                    Ok(typing) => typing,
                    Err(reason) => {
                        program.diagnostics.push(Diagnostic::new(
                            DiagnosticKind::TypingFallback,
                            format!("Cannot fetch typing '{}': {}", reference, reason),
                        ));
                        Schema::any().with_error(reason)
                    }
                };
                for node in self.typing_subscribers.remove(&reference).unwrap_or_default() {
                    program.graph.propagate_typing(node, typing.clone());
                }
            }
            Waiting::Module { node, result } => match result {
                Ok(definition) => program.graph.propagate_typing(node, definition),
                Err(error) => {
                    program.graph.propagate_typing(node, Schema::error(error.to_string()));
                    program.diagnostics.push(
                        Diagnostic::new(DiagnosticKind::ModuleFailed, error.to_string())
                            .at(node.raw()),
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EngineConfig;
    use serde_json::json;

    fn registry() -> Arc<ModuleRegistry> {
        Arc::new(ModuleRegistry::new(
            Arc::new(Catalog::new()),
            EngineConfig::default(),
        ))
    }

    #[test]
    fn fields_are_shared_per_base_and_name() {
        let catalog = Catalog::new();
        let modules = registry();
        let mut builder = ProgramBuilder::new(&catalog, &modules);
        builder.graph.add_scope("", ScopeKind::Program, None);

        let a = builder.resolve_ref("/x/a");
        let b = builder.resolve_ref("/x/b");
        let again = builder.resolve_ref("/x/a");

        assert_eq!(a, again, "same path resolves to the same field");
        match (&builder.graph.node(a).kind, &builder.graph.node(b).kind) {
            (NodeKind::Field { source: sa, .. }, NodeKind::Field { source: sb, .. }) => {
                assert_eq!(sa, sb, "sibling fields share their base")
            }
            other => panic!("expected fields, got {:?}", other),
        }
    }

    #[test]
    fn unresolved_paths_become_bad_values() {
        let catalog = Catalog::new();
        let modules = registry();
        let mut builder = ProgramBuilder::new(&catalog, &modules);
        builder.graph.add_scope("app", ScopeKind::Program, None);

        let node = builder.resolve_ref("other/a");
        assert!(matches!(builder.graph.node(node).kind, NodeKind::Bad { .. }));
        assert!(builder.graph.typing(node).has_error());
        assert_eq!(builder.diagnostics.count(DiagnosticKind::UnresolvedReference), 1);
    }

    #[test]
    fn malformed_descriptors_stop_the_build() {
        let catalog = Catalog::new();
        let modules = registry();
        let desc = ProgramDesc::new(json!({ "value": 1 }));
        assert!(matches!(
            ProgramBuilder::new(&catalog, &modules).build(&desc),
            Err(BuildError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn props_schema_references_are_downloaded() {
        let catalog = Catalog::new();
        let modules = registry();
        let desc = ProgramDesc::new(json!({ "$ref": "/title" }))
            .with_props(json!({ "$ref": "Article" }));

        let build = ProgramBuilder::new(&catalog, &modules).build(&desc).unwrap();
        assert!(!build.is_final(), "props typing is pending");
        let program = build.settle().await;

        assert_eq!(program.graph().typing(program.props()), &Schema::of_type("Article"));
    }
}
