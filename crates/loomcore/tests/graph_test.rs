use async_trait::async_trait;
use loomcore::{
    Behavior, Blueprint, Callback, Event, EventBus, FlowError, GraphError, Library, NodeFactory,
    NodeOptions, NodeRef, NodeType, Phase, Result, Schema, Value, ValueType, ON_TEARDOWN,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `value = a + b`
struct Sum;

#[async_trait]
impl Behavior for Sum {
    async fn compute(&self, node: &NodeRef, _port: &str) -> Result<Value> {
        let values = node.gather(&["a", "b"]).await?;
        let total: f64 = values.iter().filter_map(Value::as_f64).sum();
        Ok(Value::from(total))
    }
}

/// `value = sqrt(a)`, slow on purpose
struct SlowSqrt;

#[async_trait]
impl Behavior for SlowSqrt {
    async fn compute(&self, node: &NodeRef, _port: &str) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let a = node.get("a").await?.as_f64().unwrap_or_default();
        Ok(Value::from(a.sqrt()))
    }
}

/// Returns the value of its `value` port from `return_`.
struct Returner;

#[async_trait]
impl Behavior for Returner {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        Err(FlowError::Return(node.get("value").await?))
    }
}

/// Counts hook invocations.
#[derive(Clone, Default)]
struct Hooks {
    setup: Arc<AtomicUsize>,
    teardown: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    fail_call: bool,
}

#[async_trait]
impl Behavior for Hooks {
    async fn setup(&self, _node: &NodeRef) -> Result<()> {
        self.setup.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn teardown(&self, _node: &NodeRef) -> Result<()> {
        self.teardown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_call {
            return Err(FlowError::Execution("boom".to_string()));
        }
        let ctx = node.context().ok_or_else(|| FlowError::Execution("no context".into()))?;
        assert_eq!(ctx.phase(), Phase::Running);
        ctx.insert_result(node.id(), Value::from(true));
        Ok(())
    }
}

fn library() -> Arc<Library> {
    let library = Library::new();
    let sum = Schema::builder("test", "Sum")
        .input_with_default("a", ValueType::Number, 0)
        .input_with_default("b", ValueType::Number, 0)
        .computed("value", ValueType::Number)
        .build();
    library.register(Arc::new(NodeType::new(sum, || Box::new(Sum))));

    let sqrt = Schema::builder("test", "SlowSqrt")
        .input_with_default("a", ValueType::Number, 0)
        .computed("value", ValueType::Number)
        .build();
    library.register(Arc::new(NodeType::new(sqrt, || Box::new(SlowSqrt))));

    let ret = Schema::builder("test", "Return")
        .input("value", ValueType::Any)
        .slot("return_")
        .build();
    library.register(Arc::new(NodeType::new(ret, || Box::new(Returner))));
    Arc::new(library)
}

fn blueprint() -> Blueprint {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("loomcore=debug")
        .with_test_writer()
        .try_init();
    Blueprint::with_options(NodeOptions::new().with_id("bp").with_library(library())).unwrap()
}

#[tokio::test]
async fn literals_defaults_and_bindings_resolve() {
    let bp = blueprint();
    let x = bp.create("test.Sum", NodeOptions::new().with_id("x").with_value("a", 2)).unwrap();
    let y = bp
        .create("test.Sum", NodeOptions::new().with_id("y").with_source("a", x.port("value").unwrap()))
        .unwrap();

    assert_eq!(x.get("a").await.unwrap(), Value::from(2));
    assert_eq!(x.get("b").await.unwrap(), Value::from(0));
    assert_eq!(y.get("value").await.unwrap(), Value::from(2.0));

    x.set("b", 3).unwrap();
    assert_eq!(y.get("value").await.unwrap(), Value::from(5.0));
    assert!(x.set("b", "three").is_err());
}

#[tokio::test]
async fn rebinding_updates_both_sides() {
    let bp = blueprint();
    let x = bp.create("test.Sum", NodeOptions::new().with_id("x").with_value("a", 1)).unwrap();
    let w = bp.create("test.Sum", NodeOptions::new().with_id("w").with_value("a", 10)).unwrap();
    let y = bp.create("test.Sum", NodeOptions::new().with_id("y")).unwrap();

    bp.connect("x.value", "y.a").unwrap();
    assert_eq!(x.port("value").unwrap().connections().len(), 1);

    bp.connect("w.value", "y.a").unwrap();
    assert!(x.port("value").unwrap().connections().is_empty());
    assert_eq!(w.port("value").unwrap().connections().len(), 1);
    assert_eq!(y.get("value").await.unwrap(), Value::from(10.0));

    y.set("a", 7).unwrap();
    assert!(w.port("value").unwrap().connections().is_empty());
    assert_eq!(y.get("value").await.unwrap(), Value::from(7.0));
}

#[tokio::test]
async fn cyclic_bindings_fail_instead_of_hanging() {
    let bp = blueprint();
    bp.create("test.Sum", NodeOptions::new().with_id("x")).unwrap();
    bp.create("test.Sum", NodeOptions::new().with_id("y")).unwrap();
    bp.connect("x.value", "y.a").unwrap();
    bp.connect("y.value", "x.a").unwrap();

    let x = bp.find_child("x", false).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), x.get("value")).await;
    assert!(matches!(
        result,
        Ok(Err(FlowError::Graph(GraphError::CyclicResolution(_))))
    ));
}

#[tokio::test]
async fn shared_upstream_is_not_a_cycle() {
    let bp = blueprint();
    bp.create("test.Sum", NodeOptions::new().with_id("x").with_value("a", 2)).unwrap();
    let y = bp.create("test.Sum", NodeOptions::new().with_id("y")).unwrap();
    bp.connect("x.value", "y.a").unwrap();
    bp.connect("x.value", "y.b").unwrap();
    assert_eq!(y.get("value").await.unwrap(), Value::from(4.0));
}

#[tokio::test]
async fn sibling_inputs_resolve_concurrently() {
    let bp = blueprint();
    bp.create("test.SlowSqrt", NodeOptions::new().with_id("left").with_value("a", 9)).unwrap();
    bp.create("test.SlowSqrt", NodeOptions::new().with_id("right").with_value("a", 16)).unwrap();
    let sum = bp.create("test.Sum", NodeOptions::new().with_id("sum")).unwrap();
    bp.connect("left.value", "sum.a").unwrap();
    bp.connect("right.value", "sum.b").unwrap();

    let started = Instant::now();
    assert_eq!(sum.get("value").await.unwrap(), Value::from(7.0));
    assert!(started.elapsed() < Duration::from_millis(190));
}

#[tokio::test]
async fn pythagorean_blueprint_returns_hypotenuse() {
    let bp = blueprint();
    let square = |id: &str, v: i64| {
        bp.create("test.Sum", NodeOptions::new().with_id(id).with_value("a", v * v))
            .unwrap()
    };
    square("a2", 3);
    square("b2", 4);
    bp.create("test.Sum", NodeOptions::new().with_id("add")).unwrap();
    bp.create("test.SlowSqrt", NodeOptions::new().with_id("sqrt")).unwrap();
    bp.create("test.Return", NodeOptions::new().with_id("c")).unwrap();

    bp.connect("a2.value", "add.a").unwrap();
    bp.connect("b2.value", "add.b").unwrap();
    bp.connect("add.value", "sqrt.a").unwrap();
    bp.connect("sqrt.value", "c.value").unwrap();
    bp.connect("on_run", "c.return_").unwrap();

    let result = bp.invoke(HashMap::new()).await.unwrap();
    assert_eq!(result, Some(Value::from(5.0)));
    assert_eq!(bp.phase(), Phase::Idle);
}

#[tokio::test]
async fn early_return_is_the_result_and_teardown_fires_once() {
    let bp = blueprint();
    bp.create("test.Sum", NodeOptions::new().with_id("sum").with_value("a", 2).with_value("b", 5))
        .unwrap();
    bp.create("test.Return", NodeOptions::new().with_id("r")).unwrap();
    bp.connect("sum.value", "r.value").unwrap();
    bp.connect("on_run", "r.return_").unwrap();

    let teardowns = Arc::new(AtomicUsize::new(0));
    let on_teardown = Callback::new("count", Vec::new(), {
        let teardowns = teardowns.clone();
        move |_| {
            teardowns.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }
    });
    bp.signal(ON_TEARDOWN).unwrap().connect(&on_teardown).unwrap();

    let result = bp.invoke(HashMap::new()).await.unwrap();
    assert_eq!(result, Some(Value::from(7.0)));
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lifecycle_hooks_run_once_per_descendant() {
    let bp = blueprint();
    let hooks = Hooks::default();
    let schema = Schema::builder("test", "Hooks").slot("run").build();
    let factory = NodeType::new(schema, {
        let hooks = hooks.clone();
        move || -> Box<dyn Behavior> { Box::new(hooks.clone()) }
    });
    let group = bp.create_from(&factory, NodeOptions::new().with_id("group")).unwrap();
    group.create_from(&factory, NodeOptions::new().with_id("inner")).unwrap();
    bp.create_from(&factory, NodeOptions::new().with_id("other")).unwrap();
    bp.connect("on_run", "group.run").unwrap();
    bp.connect("on_run", "group.inner.run").unwrap();

    let result = bp.invoke(HashMap::new()).await.unwrap();
    assert_eq!(hooks.setup.load(Ordering::SeqCst), 3);
    assert_eq!(hooks.teardown.load(Ordering::SeqCst), 3);
    assert_eq!(hooks.calls.load(Ordering::SeqCst), 2);

    let Some(Value::Object(results)) = result else {
        panic!("expected results mapping, got {:?}", result);
    };
    assert_eq!(results.len(), 2);
    assert!(results.contains_key("group"));
    assert!(results.contains_key("inner"));
    assert!(bp.context().is_none());
}

#[tokio::test]
async fn teardown_runs_when_run_fails() {
    let bp = blueprint();
    let hooks = Hooks {
        fail_call: true,
        ..Hooks::default()
    };
    let schema = Schema::builder("test", "Hooks").slot("run").build();
    let factory = NodeType::new(schema, {
        let hooks = hooks.clone();
        move || -> Box<dyn Behavior> { Box::new(hooks.clone()) }
    });
    assert_eq!(factory.node_type(), "test.Hooks");
    bp.create_from(&factory, NodeOptions::new().with_id("failing")).unwrap();
    bp.connect("on_run", "failing.run").unwrap();

    let err = bp.invoke(HashMap::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Execution(_)));
    assert_eq!(hooks.teardown.load(Ordering::SeqCst), 1);
    assert_eq!(bp.phase(), Phase::Idle);
}

#[tokio::test]
async fn empty_blueprint_returns_nothing() {
    let bp = blueprint();
    assert_eq!(bp.invoke(HashMap::new()).await.unwrap(), None);
}

#[tokio::test]
async fn middleware_receives_run_events() {
    let bus = Arc::new(EventBus::new(64));
    let mut events = bus.subscribe();
    let bp = Blueprint::with_options(
        NodeOptions::new()
            .with_library(library())
            .with_middleware(bus.clone()),
    )
    .unwrap();
    bp.create("test.Return", NodeOptions::new().with_id("c").with_value("value", 1))
        .unwrap();
    bp.connect("on_run", "c.return_").unwrap();

    assert_eq!(bp.invoke(HashMap::new()).await.unwrap(), Some(Value::from(1)));

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
        if let Event::BlueprintFinished { success, .. } = event {
            assert!(success);
        }
    }
    assert_eq!(names.first(), Some(&"blueprint_started"));
    assert!(names.contains(&"node_entered"));
    assert_eq!(names.last(), Some(&"blueprint_finished"));
}
