use serde_json::json;
use std::sync::Arc;
use tidecore::{BuildError, DiagnosticKind, OperatorDesc, ProgramDesc, RuntimeError, Schema, Value};
use tideruntime::{
    Engine, EngineConfig, Graph, NodeId, NodeKind, Operator, OperatorModel, Program,
    ProgramBuilder, UseLabel, ValueReader,
};

fn engine() -> Engine {
    Engine::with_catalog(tidenodes::standard_catalog(), EngineConfig::default())
}

fn find(program: &Program, title: &str) -> NodeId {
    program
        .graph()
        .node_ids()
        .find(|id| program.graph().title(*id) == title)
        .unwrap_or_else(|| panic!("no node titled {}", title))
}

fn slot(program: &Program, title: &str) -> usize {
    program.state_id(find(program, title)).unwrap()
}

#[tokio::test]
async fn test_collection_of_literals() {
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": { "a": "hello", "b": 123 }
    }));
    let program = engine().compile(&desc).await.unwrap();
    assert!(program.diagnostics().is_empty(), "no diagnostics for a clean build");

    let context = program.create_context(Value::Undefined);
    assert_eq!(
        context.read().unwrap(),
        Value::from(json!({ "a": "hello", "b": 123 }))
    );
}

#[tokio::test]
async fn test_props_update_reschedules_only_changed_branches() {
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": {
            "a": { "$ref": "/x/a" },
            "rest": { "type": "list", "items": [{ "$ref": "/x/b" }] }
        }
    }));
    let program = engine().compile(&desc).await.unwrap();
    let mut context =
        program.create_context(Value::from(json!({ "x": { "a": "v1", "b": "same" } })));
    assert_eq!(context.value_of(find(&program, "/a")), Some(Value::from("v1")));

    context.update(Value::from(json!({ "x": { "a": "v2", "b": "same" } })));

    assert_eq!(context.value_of(find(&program, "/a")), Some(Value::from("v2")));
    let executed = context.last_executed();
    assert!(executed.contains(&slot(&program, "/x")));
    assert!(executed.contains(&slot(&program, "/a")));
    assert!(executed.contains(&slot(&program, "/b")), "sibling field is re-read");
    assert!(executed.contains(&slot(&program, "{ }")), "consumer of /x/a re-runs");
    assert!(
        !executed.contains(&slot(&program, "[ ]")),
        "consumer of the unchanged /x/b is not rescheduled"
    );
    assert_eq!(
        context.read().unwrap(),
        Value::from(json!({ "a": "v2", "rest": ["same"] }))
    );
}

#[tokio::test]
async fn test_inline_shares_bridges() {
    let desc = ProgramDesc::new(json!({
        "type": "inline",
        "name": "item",
        "result": {
            "type": "collection",
            "values": {
                "first": { "$ref": "/title" },
                "second": { "$ref": "/title" },
                "own": { "$ref": "item/x" }
            }
        }
    }));
    let program = engine().compile(&desc).await.unwrap();
    let graph = program.graph();
    let bridges = graph
        .node_ids()
        .filter(|id| matches!(graph.node(*id).kind, NodeKind::Bridge { .. }))
        .count();
    assert_eq!(bridges, 1, "one bridge per referenced parent value");

    let mut context = program.create_context(Value::from(json!({ "title": "T", "x": 5 })));
    assert_eq!(
        context.read().unwrap(),
        Value::from(json!({ "first": "T", "second": "T", "own": 5 }))
    );

    context.update(Value::from(json!({ "title": "T2", "x": 5 })));
    assert_eq!(
        context.read().unwrap(),
        Value::from(json!({ "first": "T2", "second": "T2", "own": 5 }))
    );
}

#[tokio::test]
async fn test_unknown_type_builds_an_undefined_node() {
    let desc = ProgramDesc::new(json!({ "type": "doesNotExist" }));
    let program = engine().compile(&desc).await.unwrap();

    assert_eq!(program.diagnostics().len(), 1, "exactly one error is reported");
    assert_eq!(program.diagnostics().count(DiagnosticKind::UnknownType), 1);
    assert!(matches!(
        program.graph().node(program.result()).kind,
        NodeKind::Undefined { .. }
    ));
    assert!(program.graph().typing(program.result()).has_error());

    let context = program.create_context(Value::Undefined);
    assert_eq!(context.read(), Err(RuntimeError::UndefinedResult));
}

#[tokio::test]
async fn test_malformed_descriptor_fails_the_build() {
    let desc = ProgramDesc::new(json!({ "type": "list", "items": { "not": "an array" } }));
    assert!(matches!(engine().compile(&desc).await, Err(BuildError::Malformed(_))));

    let desc = ProgramDesc::new(json!({ "type": "bind" }));
    assert!(matches!(engine().compile(&desc).await, Err(BuildError::Malformed(_))));
}

#[tokio::test]
async fn test_unresolved_reference_reads_undefined() {
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": { "a": { "$ref": "elsewhere/a" } }
    }));
    let program = engine().compile(&desc).await.unwrap();
    assert_eq!(program.diagnostics().count(DiagnosticKind::UnresolvedReference), 1);

    let context = program.create_context(Value::Undefined);
    let result = context.read().unwrap();
    assert_eq!(result.field("a"), Value::Undefined);
}

#[tokio::test]
async fn test_ordering_is_topological_and_deterministic() {
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": {
            "list": { "type": "list", "items": [{ "$ref": "/x/a" }, 1, { "$ref": "/y" }] },
            "nested": {
                "type": "inline",
                "name": "row",
                "result": { "type": "list", "items": [{ "$ref": "/x/a" }, { "$ref": "row/y" }] }
            },
            "again": { "$ref": "/x/a" }
        }
    }));
    let engine = engine();
    let first = engine.compile(&desc).await.unwrap();
    let second = engine.compile(&desc).await.unwrap();

    fn titles(program: &Program) -> Vec<String> {
        program.states().iter().map(|id| program.graph().title(*id)).collect()
    }
    assert_eq!(titles(&first), titles(&second), "same descriptor, same order");

    let graph: &Graph = first.graph();
    for id in graph.node_ids() {
        let node = graph.node(id);
        for used in graph.users(id) {
            let user = graph.node(used.user);
            if user.scope == node.scope {
                assert!(
                    node.state_id < user.state_id,
                    "{} must run before its user {}",
                    graph.title(id),
                    graph.title(used.user)
                );
            }
        }
    }
    for (_, scope) in graph.scopes() {
        assert_eq!(scope.states.len(), scope.values.len(), "every node gets one slot");
    }
}

#[tokio::test]
async fn test_set_state_with_same_value_schedules_nothing() {
    let desc = ProgramDesc::new(json!({ "type": "list", "items": [1, { "$ref": "/a" }] }));
    let program = engine().compile(&desc).await.unwrap();
    let mut context = program.create_context(Value::from(json!({ "a": 2 })));

    let constant = slot(&program, "1");
    assert_eq!(context.set_state(constant, Value::from(1)), Ok(false));
    assert_eq!(context.execution_index(), program.slot_count(), "cursor did not move");

    assert_eq!(context.set_state(constant, Value::from(3)), Ok(true));
    assert!(context.execution_index() <= constant, "change rewinds the cursor");
    context.execute();
    assert_eq!(context.read().unwrap(), Value::from(json!([3, 2])));

    assert_eq!(
        context.set_state(program.slot_count(), Value::Null),
        Err(RuntimeError::SlotOutOfRange {
            index: program.slot_count(),
            len: program.slot_count()
        })
    );
}

#[tokio::test]
async fn test_constant_values_are_kept_as_is() {
    let engine = engine();
    let values = [
        json!("text"),
        json!(42),
        json!(2.5),
        json!(true),
        json!(null),
        json!([1, "two", null, false]),
        json!({ "nested": [1, "two", null, true] }),
    ];

    for value in values {
        let desc = ProgramDesc::new(json!({ "type": "constant", "value": value.clone() }));
        let program = engine.compile(&desc).await.unwrap();
        let context = program.create_context(Value::Undefined);
        assert_eq!(context.read().unwrap().to_json(), value, "constant {}", value);

        if !value.is_array() && !value.is_object() {
            let program = engine.compile(&ProgramDesc::new(value.clone())).await.unwrap();
            let context = program.create_context(Value::Undefined);
            assert_eq!(context.read().unwrap().to_json(), value, "literal {}", value);
        }
    }
}

#[tokio::test]
async fn test_field_typing_follows_props_schema() {
    let desc = ProgramDesc::new(json!({ "$ref": "/x/a" })).with_props(json!({
        "type": "object",
        "properties": {
            "x": { "type": "object", "properties": { "a": { "type": "string" } } }
        }
    }));
    let program = engine().compile(&desc).await.unwrap();

    assert_eq!(program.graph().typing(find(&program, "/a")), &Schema::of_type("string"));
    assert_eq!(
        program.graph().typing(program.output()),
        &Schema::of_type("string"),
        "output is typed like the result"
    );
}

#[tokio::test]
async fn test_assign_through_binding() {
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": { "value": { "type": "bind", "path": "/x/a" } }
    }));
    let program = engine().compile(&desc).await.unwrap();
    let mut context = program.create_context(Value::from(json!({ "x": { "a": 1, "b": 2 } })));

    context.assign(find(&program, ">>"), Value::from(5)).unwrap();

    assert_eq!(context.read().unwrap(), Value::from(json!({ "value": 5 })));
    assert_eq!(
        context.value_of(program.props()),
        Some(Value::from(json!({ "x": { "a": 5, "b": 2 } }))),
        "the write lands in the props"
    );
}

#[tokio::test]
async fn test_assign_local_and_refuse_constants() {
    let desc = ProgramDesc::new(json!({
        "type": "list",
        "items": [{ "type": "local", "value": 0 }, 7]
    }));
    let program = engine().compile(&desc).await.unwrap();
    let mut context = program.create_context(Value::Undefined);
    assert_eq!(context.read().unwrap(), Value::from(json!([0, 7])));

    context.assign(find(&program, "[local]"), Value::from(3)).unwrap();
    assert_eq!(context.read().unwrap(), Value::from(json!([3, 7])));

    let constant = find(&program, "7");
    assert_eq!(
        context.assign(constant, Value::from(8)),
        Err(RuntimeError::NotWritable(constant.raw()))
    );
}

/// Forwards the props; wired into a loop with its user
#[derive(Debug)]
struct Forward {
    input: NodeId,
}

impl Operator for Forward {
    fn title(&self) -> String {
        "forward".to_string()
    }

    fn inputs(&self) -> Vec<(NodeId, UseLabel)> {
        vec![(self.input, UseLabel::Value)]
    }

    fn evaluate(&self, reader: &dyn ValueReader) -> Value {
        reader.read(self.input)
    }
}

struct LoopModel;

impl OperatorModel for LoopModel {
    fn name(&self) -> &str {
        "loop"
    }

    fn build(
        &self,
        _desc: &OperatorDesc,
        builder: &mut ProgramBuilder<'_>,
    ) -> Result<NodeId, BuildError> {
        let props = builder.graph().scope(builder.current_scope()).props;
        let head = builder.add_operator(Box::new(Forward { input: props }));
        let tail = builder.add_operator(Box::new(Forward { input: head }));
        builder.add_use(tail, head, UseLabel::Value);
        Ok(tail)
    }
}

#[tokio::test]
async fn test_cycles_are_reported_and_still_execute() {
    let mut catalog = tidenodes::standard_catalog();
    catalog.register(Arc::new(LoopModel));
    let engine = Engine::with_catalog(catalog, EngineConfig::default());

    let program = engine
        .compile(&ProgramDesc::new(json!({ "type": "loop" })))
        .await
        .unwrap();
    assert_eq!(program.diagnostics().count(DiagnosticKind::NotADag), 1);

    let context = program.create_context(Value::from(4));
    assert_eq!(context.read().unwrap(), Value::from(4));
}

#[test]
fn test_static_evaluation() {
    let engine = engine();
    let desc = json!({
        "type": "list",
        "items": [1, { "type": "collection", "values": { "a": true } }]
    });
    assert_eq!(
        engine.catalog().eval_json(&desc).unwrap(),
        Value::from(json!([1, { "a": true }]))
    );

    assert!(matches!(
        engine.catalog().eval_json(&json!({ "$ref": "/a" })),
        Err(tidecore::EvalError::Reference(_))
    ));
    assert!(matches!(
        engine.catalog().eval_json(&json!({ "type": "nope" })),
        Err(tidecore::EvalError::UnknownType(_))
    ));
    assert!(matches!(
        engine.catalog().eval_json(&json!({ "type": "element" })),
        Err(tidecore::EvalError::NotEvaluable(_))
    ));
}

#[tokio::test]
async fn test_nested_program_renders_elements() {
    let desc = ProgramDesc::new(json!({
        "type": "element",
        "view": {
            "type": "component",
            "props": { "type": "object" },
            "result": {
                "type": "collection",
                "values": { "greeting": { "$ref": "/name" } }
            }
        },
        "props": { "name": { "$ref": "/who" } }
    }));
    let program = engine().compile(&desc).await.unwrap();
    assert_eq!(program.graph().typing(program.result()), &Schema::element());

    let context = program.create_context(Value::from(json!({ "who": "Ada" })));
    let result = context.read().unwrap();
    let element = result.as_element().unwrap();
    assert_eq!(element.props, Value::from(json!({ "name": "Ada" })));
    assert_eq!(
        element.expand(),
        Some(Value::from(json!({ "greeting": "Ada" })))
    );
}
