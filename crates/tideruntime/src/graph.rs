//! Arena holding the nodes and scopes of one built program.
//!
//! Nodes are addressed by [`NodeId`] handles into the arena, so back edges
//! (a node's users, a scope's parent) are plain index lookups.

use crate::module::ModuleEntry;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidecore::{Diagnostic, DiagnosticKind, Diagnostics, Schema, Value};

static NEXT_UID: AtomicU64 = AtomicU64::new(0);

/// Handle of a node inside its program arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of a scope (the root program or a nested inline program)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u32);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Role of an edge between a producer and one of its users
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UseLabel {
    /// Scope props feeding a nested program
    Argument,
    /// Scope result feeding the program output
    Result,
    /// List item at a position
    Item(usize),
    /// Named collection property
    Property(String),
    /// Component of an element
    View,
    /// Props of an element
    Props,
    /// Base of a field
    Source,
    /// Forwarded value (bridges, bindings)
    Value,
}

impl UseLabel {
    pub fn title(&self) -> String {
        match self {
            UseLabel::Argument => "[props]".to_string(),
            UseLabel::Result => "[result]".to_string(),
            UseLabel::Item(i) => format!("#{}", i),
            UseLabel::Property(name) => name.clone(),
            UseLabel::View => "[view]".to_string(),
            UseLabel::Props => "[props]".to_string(),
            UseLabel::Source => "[source]".to_string(),
            UseLabel::Value => "value".to_string(),
        }
    }
}

/// One consumer of a node's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Use {
    pub user: NodeId,
    pub label: UseLabel,
}

/// Read access to the current values of a scope, handed to operators
pub trait ValueReader {
    fn read(&self, node: NodeId) -> Value;
}

/// Behaviour of a catalog operator node.
///
/// Operators are pure: they compute their value from the values of their
/// inputs, which the builder has already wired as edges.
pub trait Operator: fmt::Debug + Send + Sync {
    /// Short display title
    fn title(&self) -> String;

    /// Inputs of the operator with the role of each edge
    fn inputs(&self) -> Vec<(NodeId, UseLabel)>;

    /// Compute the operator value
    fn evaluate(&self, reader: &dyn ValueReader) -> Value;

    /// Typing deduced from the inputs' typing, `None` keeps the current one
    fn typing(&self, _graph: &Graph) -> Option<Schema> {
        None
    }

    /// Node receiving writes made to this operator, if any
    fn write_target(&self) -> Option<NodeId> {
        None
    }
}

#[derive(Debug)]
pub enum NodeKind {
    /// Input of a scope
    Props,
    /// Writable source local to a scope, holding `initial` until assigned
    Local { initial: Value },
    Constant(Value),
    /// Named property of another node of the same scope
    Field { name: String, source: NodeId },
    /// Value of the enclosing scope forwarded into a nested scope
    Bridge { source: NodeId },
    /// Export of an external module
    Module {
        reference: String,
        entry: Arc<ModuleEntry>,
    },
    /// Nested program sharing its parent's context
    Inline { scope: ScopeId },
    /// Separately built program exported as a component value
    Component { value: Value },
    /// Root scope output, reports result changes
    Output { result: NodeId },
    /// Stand-in for an unknown operator type
    Undefined { tag: String },
    /// Stand-in for an unresolved reference
    Bad { path: String },
    Operator(Box<dyn Operator>),
}

#[derive(Debug)]
pub struct NodeEntry {
    /// Process-unique identity
    pub uid: u64,
    pub scope: ScopeId,
    /// Execution slot, assigned once by the scope ordering pass
    pub state_id: Option<usize>,
    pub typing: Schema,
    pub users: Vec<Use>,
    pub kind: NodeKind,
}

impl NodeEntry {
    pub fn is_source(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Props | NodeKind::Local { .. } | NodeKind::Field { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Program,
    Inline,
}

#[derive(Debug)]
pub struct Scope {
    pub name: String,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Inline node standing for this scope in its parent
    pub owner: Option<NodeId>,
    pub props: NodeId,
    pub result: Option<NodeId>,
    /// Every node created in this scope, in creation order
    pub values: Vec<NodeId>,
    /// Topological order; position is the node's `state_id`
    pub states: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<NodeEntry>,
    scopes: Vec<Scope>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope together with its props node
    pub fn add_scope(
        &mut self,
        name: impl Into<String>,
        kind: ScopeKind,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        let scope = ScopeId(self.scopes.len() as u32);
        let props = NodeId(self.nodes.len() as u32);
        self.scopes.push(Scope {
            name: name.into(),
            kind,
            parent,
            owner: None,
            props,
            result: None,
            values: Vec::new(),
            states: Vec::new(),
        });
        self.add_node(scope, NodeKind::Props);
        scope
    }

    pub fn add_node(&mut self, scope: ScopeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeEntry {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            scope,
            state_id: None,
            typing: Schema::any(),
            users: Vec::new(),
            kind,
        });
        self.scopes[scope.index()].values.push(id);
        id
    }

    pub fn add_use(&mut self, source: NodeId, user: NodeId, label: UseLabel) {
        self.nodes[source.index()].users.push(Use { user, label });
    }

    pub fn node(&self, id: NodeId) -> &NodeEntry {
        &self.nodes[id.index()]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(i, scope)| (ScopeId(i as u32), scope))
    }

    pub fn typing(&self, id: NodeId) -> &Schema {
        &self.nodes[id.index()].typing
    }

    pub fn users(&self, id: NodeId) -> &[Use] {
        &self.nodes[id.index()].users
    }

    /// Inputs of a node, paired with the role of each edge
    pub fn inputs(&self, id: NodeId) -> Vec<(NodeId, UseLabel)> {
        match &self.node(id).kind {
            NodeKind::Field { source, .. } => vec![(*source, UseLabel::Source)],
            NodeKind::Bridge { source } => vec![(*source, UseLabel::Value)],
            NodeKind::Output { result } => vec![(*result, UseLabel::Result)],
            NodeKind::Inline { scope } => {
                let scope = self.scope(*scope);
                let mut inputs = Vec::new();
                if let Some(parent) = scope.parent {
                    inputs.push((self.scope(parent).props, UseLabel::Argument));
                }
                for value in &scope.values {
                    if let NodeKind::Bridge { source } = self.node(*value).kind {
                        inputs.push((source, UseLabel::Value));
                    }
                }
                if let Some(result) = scope.result {
                    inputs.push((result, UseLabel::Result));
                }
                inputs
            }
            NodeKind::Operator(op) => op.inputs(),
            _ => Vec::new(),
        }
    }

    pub fn title(&self, id: NodeId) -> String {
        match &self.node(id).kind {
            NodeKind::Props => "[props]".to_string(),
            NodeKind::Local { .. } => "[local]".to_string(),
            NodeKind::Constant(value) => value.to_string(),
            NodeKind::Field { name, .. } => format!("/{}", name),
            NodeKind::Bridge { .. } => "Bridge".to_string(),
            NodeKind::Module { reference, .. } => format!("Module: {}", reference),
            NodeKind::Inline { scope } => format!("Inline: {}", self.scope(*scope).name),
            NodeKind::Component { value } => match value {
                Value::Component(component) => format!("Program: {}", component.name()),
                _ => "Program".to_string(),
            },
            NodeKind::Output { .. } => "[output]".to_string(),
            NodeKind::Undefined { .. } => "<undefined>".to_string(),
            NodeKind::Bad { .. } => "<bad>".to_string(),
            NodeKind::Operator(op) => op.title(),
        }
    }

    /// Typing hook of a node, recomputed from its inputs' typing
    pub fn compute_typing(&self, id: NodeId) -> Option<Schema> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Constant(value) => Some(Schema::of_value(value)),
            NodeKind::Field { name, source } => Some(self.typing(*source).property(name)),
            NodeKind::Bridge { source } => Some(self.typing(*source).clone()),
            NodeKind::Output { result } => Some(self.typing(*result).clone()),
            NodeKind::Inline { scope } => self
                .scope(*scope)
                .result
                .map(|result| self.typing(result).clone()),
            NodeKind::Operator(op) => op.typing(self),
            NodeKind::Props => {
                let scope = self.scope(node.scope);
                match (scope.kind, scope.parent) {
                    (ScopeKind::Inline, Some(parent)) => {
                        Some(self.typing(self.scope(parent).props).clone())
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Set a node's typing and run the typing hook of every user.
    ///
    /// Users whose recomputed typing changes propagate further; an unchanged
    /// typing stops the walk.
    pub fn propagate_typing(&mut self, id: NodeId, typing: Schema) {
        if self.nodes[id.index()].typing == typing {
            return;
        }
        self.nodes[id.index()].typing = typing;

        let users: Vec<NodeId> = self.users(id).iter().map(|u| u.user).collect();
        for user in users {
            if let NodeKind::Inline { scope } = self.node(user).kind {
                // Inline scopes read their parent's props
                let inner_props = self.scope(scope).props;
                if let Some(typing) = self.compute_typing(inner_props) {
                    self.propagate_typing(inner_props, typing);
                }
            }
            if let Some(typing) = self.compute_typing(user) {
                self.propagate_typing(user, typing);
            }
        }

        // The result of an inline scope types its owner in the parent scope
        let (result, owner) = {
            let scope = self.scope(self.node(id).scope);
            (scope.result, scope.owner)
        };
        if let (Some(result), Some(owner)) = (result, owner) {
            if result == id {
                if let Some(typing) = self.compute_typing(owner) {
                    self.propagate_typing(owner, typing);
                }
            }
        }
    }

    /// Assign execution slots to the nodes of one scope.
    ///
    /// Depth-first search along `users` edges (producer to consumer) starting
    /// at the scope props, then from every remaining node of the scope in
    /// creation order. Users living in another scope are not followed: each
    /// scope is ordered by its own pass. The reversed post-order gives the
    /// slot of every node. A user reached while its own subtree is still in
    /// progress closes a cycle: the edge is reported and skipped.
    pub fn order_scope(&mut self, scope: ScopeId, diagnostics: &mut Diagnostics) -> &[NodeId] {
        let mut postordered = Vec::new();
        let mut completed = HashSet::new();
        let mut visiting = HashSet::new();

        let roots: Vec<NodeId> = std::iter::once(self.scope(scope).props)
            .chain(self.scope(scope).values.iter().copied())
            .collect();
        for root in roots {
            self.visit_sub_dag(
                root,
                scope,
                &mut visiting,
                &mut completed,
                &mut postordered,
                diagnostics,
            );
        }

        postordered.reverse();
        for (slot, node) in postordered.iter().enumerate() {
            self.nodes[node.index()].state_id = Some(slot);
        }
        tracing::debug!(
            "Ordered scope '{}' with {} slots",
            self.scope(scope).name,
            postordered.len()
        );
        self.scopes[scope.index()].states = postordered;
        &self.scopes[scope.index()].states
    }

    fn visit_sub_dag(
        &self,
        node: NodeId,
        scope: ScopeId,
        visiting: &mut HashSet<NodeId>,
        completed: &mut HashSet<NodeId>,
        postordered: &mut Vec<NodeId>,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        if completed.contains(&node) {
            return true;
        }
        if !visiting.insert(node) {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::NotADag,
                    format!("not a DAG: feedback edge into {} ({})", node, self.title(node)),
                )
                .at(node.raw()),
            );
            return false;
        }

        for user in self.users(node) {
            if self.node(user.user).scope == scope {
                self.visit_sub_dag(user.user, scope, visiting, completed, postordered, diagnostics);
            }
        }

        completed.insert(node);
        postordered.push(node);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(graph: &mut Graph, scope: ScopeId, value: i32) -> NodeId {
        graph.add_node(scope, NodeKind::Constant(Value::from(value)))
    }

    #[test]
    fn ordering_places_producers_first() {
        let mut graph = Graph::new();
        let root = graph.add_scope("", ScopeKind::Program, None);
        let props = graph.scope(root).props;
        let a = graph.add_node(
            root,
            NodeKind::Field { name: "a".to_string(), source: props },
        );
        graph.add_use(props, a, UseLabel::Source);
        let c = constant(&mut graph, root, 1);

        let mut diagnostics = Diagnostics::new();
        let order = graph.order_scope(root, &mut diagnostics).to_vec();

        assert_eq!(order.len(), 3, "every node of the scope gets a slot");
        assert!(diagnostics.is_empty());
        let slot = |id: NodeId| graph.node(id).state_id.unwrap();
        assert!(slot(props) < slot(a), "props before its field");
        assert!(graph.node(c).state_id.is_some());
    }

    #[test]
    fn cycles_are_reported_and_cut() {
        let mut graph = Graph::new();
        let root = graph.add_scope("", ScopeKind::Program, None);
        let a = constant(&mut graph, root, 1);
        let b = constant(&mut graph, root, 2);
        graph.add_use(a, b, UseLabel::Value);
        graph.add_use(b, a, UseLabel::Value);

        let mut diagnostics = Diagnostics::new();
        let order = graph.order_scope(root, &mut diagnostics).to_vec();

        assert_eq!(order.len(), 3, "ordering still covers the scope");
        assert_eq!(diagnostics.count(DiagnosticKind::NotADag), 1);
    }

    #[test]
    fn ordering_stays_inside_the_scope() {
        let mut graph = Graph::new();
        let root = graph.add_scope("", ScopeKind::Program, None);
        let inner = graph.add_scope("item", ScopeKind::Inline, Some(root));
        let props = graph.scope(root).props;
        let bridge = graph.add_node(inner, NodeKind::Bridge { source: props });
        graph.add_use(props, bridge, UseLabel::Value);

        let mut diagnostics = Diagnostics::new();
        let root_order = graph.order_scope(root, &mut diagnostics).to_vec();
        let inner_order = graph.order_scope(inner, &mut diagnostics).to_vec();

        assert_eq!(root_order, vec![props]);
        assert!(inner_order.contains(&bridge), "bridge is ordered by its own scope");
    }

    #[test]
    fn typing_flows_to_users() {
        let mut graph = Graph::new();
        let root = graph.add_scope("", ScopeKind::Program, None);
        let props = graph.scope(root).props;
        let field = graph.add_node(
            root,
            NodeKind::Field { name: "title".to_string(), source: props },
        );
        graph.add_use(props, field, UseLabel::Source);

        graph.propagate_typing(
            props,
            Schema::from(serde_json::json!({
                "type": "object",
                "properties": { "title": { "type": "string" } }
            })),
        );

        assert_eq!(graph.typing(field), &Schema::of_type("string"));
    }
}
