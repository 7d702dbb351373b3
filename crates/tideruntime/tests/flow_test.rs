use indexmap::IndexMap;
use tidecore::Value;
use tideruntime::flow::FlowBuilder;

#[test]
fn test_mutation_notifies_field_users_only() {
    let mut builder = FlowBuilder::new();
    let node = builder.create_state("items");
    let field = builder.get_field("/items/0").unwrap().unwrap();
    let value = builder.create_array(vec![node]).unwrap();
    builder.set_output(value).unwrap();
    let definition = builder.finalize();

    let mut context = definition.create_context();
    context.execute();

    let container = Value::array(vec![Value::from(1)]);
    assert_eq!(context.set_state(node, container.clone()), Ok(true));
    assert!(context.is_scheduled(field), "new container notifies field users");
    assert!(context.is_scheduled(value), "new container notifies value users");
    context.execute();
    assert_eq!(context.state(field), Some(&Value::from(1)));

    assert_eq!(context.set_state(node, container.clone()), Ok(false));
    assert!(context.is_scheduled(field), "mutation notifies field users");
    assert!(!context.is_scheduled(value), "mutation skips value users");
    context.execute();

    assert_eq!(context.set_state(node, Value::array(vec![Value::from(1)])), Ok(true));
    assert!(context.is_scheduled(field));
    assert!(context.is_scheduled(value));
}

#[test]
fn test_elements_follow_props_content() {
    let mut builder = FlowBuilder::new();
    let component = builder.create_state("view");
    let title = builder.create_property("title").unwrap();
    let mut values = IndexMap::new();
    values.insert("title".to_string(), title);
    let props = builder.create_collection(values).unwrap();
    let element = builder.create_element(component, props).unwrap();
    builder.set_output(element).unwrap();
    let definition = builder.finalize();

    assert_eq!(definition.operator(props).unwrap().content_users(), &[element]);
    assert_eq!(definition.operator(component).unwrap().value_users(), &[element]);

    let mut context = definition.create_context();
    context.update(Value::from(serde_json::json!({ "title": "Hello" })));
    let output = context.output().unwrap().clone();
    let element_value = output.as_element().unwrap();
    assert_eq!(element_value.props, Value::from(serde_json::json!({ "title": "Hello" })));

    context.notify_mutation(props).unwrap();
    assert!(context.is_scheduled(element), "props mutation re-creates the element");
    context.execute();
    assert!(!context.output().unwrap().same(&output));

    assert!(context.set_named_state("view", Value::from("card")));
    assert_eq!(context.output().unwrap().field("component"), Value::from("card"));
    assert!(!context.set_named_state("missing", Value::Null));
}

#[test]
fn test_operators_are_evaluated_after_their_inputs() {
    let mut builder = FlowBuilder::new();
    let a = builder.get_field("/user/name").unwrap();
    assert_eq!(a, None, "unknown sources do not resolve");

    builder.create_property("user").unwrap();
    let name = builder.get_field("/user/name").unwrap().unwrap();
    let greeting = builder.get_constant(Value::from("hi"));
    let list = builder.create_array(vec![greeting, name]).unwrap();
    builder.set_output(list).unwrap();
    let definition = builder.finalize();

    let mut context = definition.create_context();
    context.update(Value::from(serde_json::json!({ "user": { "name": "Ada" } })));
    assert_eq!(
        context.output(),
        Some(&Value::from(serde_json::json!(["hi", "Ada"])))
    );

    context.update(Value::from(serde_json::json!({ "user": { "name": "Grace" } })));
    assert_eq!(
        context.output(),
        Some(&Value::from(serde_json::json!(["hi", "Grace"])))
    );
}
