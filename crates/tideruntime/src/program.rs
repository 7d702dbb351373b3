use crate::context::ExecutionContext;
use crate::graph::{Graph, NodeId, ScopeId, UseLabel};
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{json, Value as Json};
use std::collections::HashSet;
use std::sync::Arc;
use tidecore::{Component, Diagnostics, ProgramDesc, Value};

/// A built program: the node arena, its scopes and their orderings
#[derive(Debug)]
pub struct Program {
    pub(crate) name: String,
    pub(crate) graph: Graph,
    pub(crate) output: NodeId,
    pub(crate) modules: Vec<NodeId>,
    pub(crate) descriptor: ProgramDesc,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) trace_execution: bool,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Descriptor this program was built from
    pub fn descriptor(&self) -> &ProgramDesc {
        &self.descriptor
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn props(&self) -> NodeId {
        self.graph.scope(ScopeId::ROOT).props
    }

    pub fn result(&self) -> NodeId {
        self.graph.scope(ScopeId::ROOT).result.unwrap_or(self.output)
    }

    pub fn output(&self) -> NodeId {
        self.output
    }

    /// Module nodes referenced by the program
    pub fn modules(&self) -> &[NodeId] {
        &self.modules
    }

    /// Root scope nodes in execution order
    pub fn states(&self) -> &[NodeId] {
        &self.graph.scope(ScopeId::ROOT).states
    }

    pub fn slot_count(&self) -> usize {
        self.states().len()
    }

    pub fn state_id(&self, node: NodeId) -> Option<usize> {
        self.graph.node(node).state_id
    }

    pub fn trace_execution(&self) -> bool {
        self.trace_execution
    }

    /// Visit the inputs of a node with the role of each edge
    pub fn for_each_use(&self, node: NodeId, mut visitor: impl FnMut(NodeId, &UseLabel)) {
        for (input, label) in self.graph.inputs(node) {
            visitor(input, &label);
        }
    }

    /// Every node reachable from the props, the root values, the modules
    /// and the result, each listed once
    pub fn values(&self) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut values = Vec::new();

        let roots = std::iter::once(self.props())
            .chain(self.graph.scope(ScopeId::ROOT).values.iter().copied())
            .chain(self.modules.iter().copied())
            .chain(std::iter::once(self.result()));
        for root in roots {
            self.collect_values(root, &mut visited, &mut values);
        }
        values
    }

    fn collect_values(
        &self,
        node: NodeId,
        visited: &mut HashSet<NodeId>,
        values: &mut Vec<NodeId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        values.push(node);
        self.for_each_use(node, |input, _| self.collect_values(input, visited, values));
    }

    /// Node titles and typing, with the `$error` annotations surfaced
    pub fn typing_report(&self) -> Json {
        let nodes: Vec<Json> = self
            .graph
            .node_ids()
            .map(|id| {
                let node = self.graph.node(id);
                json!({
                    "node": id.raw(),
                    "title": self.graph.title(id),
                    "scope": self.graph.scope(node.scope).name,
                    "slot": node.state_id,
                    "typing": node.typing,
                    "error": node.typing.error_message(),
                })
            })
            .collect();
        json!({ "program": self.name, "nodes": nodes })
    }

    /// Titled nodes and labelled producer-to-user edges, for visualization
    pub fn dependency_graph(&self) -> DiGraph<String, String> {
        let mut graph = DiGraph::with_capacity(self.graph.len(), self.graph.len());
        for id in self.graph.node_ids() {
            graph.add_node(format!("{} {}", id, self.graph.title(id)));
        }
        for id in self.graph.node_ids() {
            for used in self.graph.users(id) {
                graph.add_edge(
                    NodeIndex::new(id.index()),
                    NodeIndex::new(used.user.index()),
                    used.label.title(),
                );
            }
        }
        graph
    }

    /// Mount the program against `props`
    pub fn create_context(self: &Arc<Self>, props: Value) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(self), props)
    }
}

/// A program exported as a component value
#[derive(Debug)]
pub struct ProgramComponent {
    program: Arc<Program>,
}

impl ProgramComponent {
    pub fn new(program: Arc<Program>) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }
}

impl Component for ProgramComponent {
    fn name(&self) -> &str {
        &self.program.name
    }

    /// Run a fresh context; an undefined result renders as `Undefined`
    fn render(&self, props: &Value) -> Value {
        self.program
            .create_context(props.clone())
            .read()
            .unwrap_or_default()
    }
}
