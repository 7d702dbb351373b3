use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidecore::{DiagnosticKind, ModuleError, ProgramDesc, RuntimeError, Schema, Value};
use tideruntime::{Engine, EngineConfig, ModuleState, SchemaFetcher, StaticModuleServer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn engine() -> Engine {
    Engine::with_catalog(tidenodes::standard_catalog(), EngineConfig::default())
}

fn theme_server() -> StaticModuleServer {
    StaticModuleServer::new()
        .with_module(
            "theme",
            json!({
                "type": "data",
                "definition": {
                    "type": "object",
                    "properties": { "color": { "type": "string" } }
                },
                "data": { "color": "red" }
            }),
        )
        .with_module(
            "greeter",
            json!({
                "type": "component",
                "props": { "type": "object" },
                "result": {
                    "type": "collection",
                    "values": { "greeting": { "$ref": "/name" } }
                }
            }),
        )
        .with_module(
            "kit",
            json!({
                "type": "assembly",
                "objects": [
                    { "publish": "icons", "type": "data", "data": ["home", "gear"] }
                ]
            }),
        )
}

#[tokio::test]
async fn test_data_modules_are_loaded_before_mounting() {
    init_tracing();
    let engine = engine().with_module_server(Arc::new(theme_server()));
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": {
            "theme": { "$ref": "module:theme" },
            "icons": { "$ref": "module:kit#icons" }
        }
    }));

    let program = engine.compile(&desc).await.unwrap();
    assert!(program.diagnostics().is_empty());
    assert_eq!(program.modules().len(), 2);
    assert_eq!(
        program.graph().typing(program.modules()[0]).property("color"),
        Schema::of_type("string"),
        "module node is typed by its definition"
    );

    let context = program.create_context(Value::Undefined);
    assert_eq!(
        context.read().unwrap(),
        Value::from(json!({ "theme": { "color": "red" }, "icons": ["home", "gear"] }))
    );
}

#[tokio::test]
async fn test_module_exports_refresh_after_loading() {
    let engine = engine().with_module_server(Arc::new(theme_server()));
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": { "theme": { "$ref": "module:theme" } }
    }));

    let build = engine.build(&desc).unwrap();
    assert!(!build.is_final(), "module definition is still pending");
    let program = Arc::new(build.into_program());

    let mut context = program.create_context(Value::Undefined);
    assert_eq!(context.read().unwrap().field("theme"), Value::Invalid);

    assert_eq!(engine.modules().flush().await, 1);
    assert_eq!(engine.modules().get("theme").unwrap().state(), ModuleState::Loaded);
    context.refresh_modules();

    assert_eq!(
        context.read().unwrap(),
        Value::from(json!({ "theme": { "color": "red" } }))
    );
}

#[tokio::test]
async fn test_failed_modules_are_diagnosed() {
    let engine = engine().with_module_server(Arc::new(theme_server()));
    let desc = ProgramDesc::new(json!({
        "type": "list",
        "items": [{ "$ref": "module:missing" }]
    }));

    let program = engine.compile(&desc).await.unwrap();
    assert_eq!(program.diagnostics().count(DiagnosticKind::ModuleFailed), 1);
    assert!(program.graph().typing(program.modules()[0]).has_error());
    assert_eq!(
        engine.modules().get("missing").unwrap().error(),
        Some(ModuleError::NotFound("missing".to_string()))
    );

    let context = program.create_context(Value::Undefined);
    assert_eq!(context.read().unwrap(), Value::from(vec![Value::Undefined]));
}

#[tokio::test]
async fn test_modules_without_server_are_unresolved() {
    let desc = ProgramDesc::new(json!({ "$ref": "module:theme" }));
    let program = engine().compile(&desc).await.unwrap();

    assert_eq!(program.diagnostics().count(DiagnosticKind::UnresolvedReference), 1);
    assert!(program.modules().is_empty());
    let context = program.create_context(Value::Undefined);
    assert_eq!(context.read(), Err(RuntimeError::UndefinedResult));
}

#[tokio::test]
async fn test_late_children_of_settled_modules_do_not_block_compile() {
    let engine = engine().with_module_server(Arc::new(theme_server()));
    engine
        .compile(&ProgramDesc::new(json!({ "$ref": "module:kit#icons" })))
        .await
        .unwrap();
    engine
        .modules()
        .install_module("host", Schema::of_type("object"), Value::Null);

    for reference in ["module:kit#missing", "module:host#button"] {
        let desc = ProgramDesc::new(json!({ "$ref": reference }));
        let program = tokio::time::timeout(Duration::from_secs(3), engine.compile(&desc))
            .await
            .expect("compile settles")
            .unwrap();

        assert_eq!(
            program.diagnostics().count(DiagnosticKind::UnresolvedReference),
            1,
            "{} is reported",
            reference
        );
        assert!(program.modules().is_empty());
        let context = program.create_context(Value::Undefined);
        assert_eq!(context.read(), Err(RuntimeError::UndefinedResult));
    }
}

#[tokio::test]
async fn test_component_modules_render_elements() {
    let engine = engine().with_module_server(Arc::new(theme_server()));
    let desc = ProgramDesc::new(json!({
        "type": "element",
        "view": { "$ref": "module:greeter" },
        "props": { "name": "Ada" }
    }));

    let program = engine.compile(&desc).await.unwrap();
    assert_eq!(
        program.graph().typing(program.modules()[0]).type_name(),
        Some("view")
    );

    let context = program.create_context(Value::Undefined);
    let element = context.read().unwrap();
    assert_eq!(
        element.as_element().and_then(|e| e.expand()),
        Some(Value::from(json!({ "greeting": "Ada" })))
    );
}

struct FailingFetcher;

#[async_trait]
impl SchemaFetcher for FailingFetcher {
    async fn fetch_schema(&self, reference: &str) -> Result<Schema, String> {
        Err(format!("no schema named {}", reference))
    }
}

#[tokio::test]
async fn test_props_typing_falls_back_when_fetch_fails() {
    let engine = engine().with_schema_fetcher(Arc::new(FailingFetcher));
    let desc = ProgramDesc::new(json!({ "$ref": "/title" }))
        .with_props(json!({ "$ref": "Article" }));

    let program = engine.compile(&desc).await.unwrap();
    assert_eq!(program.diagnostics().count(DiagnosticKind::TypingFallback), 1);
    assert!(program.graph().typing(program.props()).has_error());

    let context = program.create_context(Value::from(json!({ "title": "Hello" })));
    assert_eq!(context.read().unwrap(), Value::from("Hello"), "typing never blocks execution");
}

#[tokio::test]
async fn test_on_change_reports_result_changes_only() {
    let desc = ProgramDesc::new(json!({
        "type": "collection",
        "values": { "a": { "$ref": "/x/a" } }
    }));
    let program = engine().compile(&desc).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut context = program
        .create_context(Value::from(json!({ "x": { "a": "v1" } })))
        .with_on_change(move |value| sink.lock().unwrap().push(value.clone()));

    context.update(Value::from(json!({ "x": { "a": "v1" } })));
    assert!(seen.lock().unwrap().is_empty(), "equal field values keep the result");

    context.update(Value::from(json!({ "x": { "a": "v2" } })));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from(json!({ "a": "v2" }))]
    );
}

#[tokio::test]
async fn test_live_program_switches_contexts_in_place() {
    let engine = engine();
    let mut live = engine
        .live(&ProgramDesc::new(json!({ "$ref": "/name" })))
        .await
        .unwrap();

    let first = live.create_context(Value::from(json!({ "name": "Ada", "age": 36 })));
    let second = live.create_context(Value::from(json!({ "name": "Alan", "age": 41 })));
    assert_eq!(live.len(), 2);
    assert_eq!(live.read(first).unwrap(), Value::from("Ada"));

    let edited = engine
        .compile(&ProgramDesc::new(json!({
            "type": "list",
            "items": [{ "$ref": "/name" }, { "$ref": "/age" }]
        })))
        .await
        .unwrap();
    live.switch_program(edited);

    assert_eq!(live.read(first).unwrap(), Value::from(json!(["Ada", 36])));
    assert_eq!(live.read(second).unwrap(), Value::from(json!(["Alan", 41])));
    assert_eq!(live.context_ids().collect::<Vec<_>>(), vec![first, second]);

    live.update(second, Value::from(json!({ "name": "Grace", "age": 85 }))).unwrap();
    assert_eq!(live.read(second).unwrap(), Value::from(json!(["Grace", 85])));

    live.dispose_context(first).unwrap();
    assert_eq!(live.read(first), Err(RuntimeError::UnknownContext(first)));
    assert_eq!(live.len(), 1);
}
