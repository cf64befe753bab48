use loomcore::{FlowError, GraphError, NodeOptions, Value};
use loomnodes::standard_library;
use loomruntime::{
    dump_blueprint, dump_library, load_blueprint, parse_blueprint, parse_data, Format, read_data, save_blueprint,
    validate_blueprint, BlueprintRecord, FilesystemDriver, LibraryConfig, LoomRuntime, NodeRecord,
    PersistError, RuntimeConfig, Storage, StorageConfig, StorageDriver,
};
use std::collections::HashMap;
use tokio::sync::broadcast::error::RecvError;
use std::path::PathBuf;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

fn options() -> NodeOptions {
    NodeOptions::new().with_library(standard_library())
}

fn args(a: i64, b: i64) -> HashMap<String, Value> {
    [("a".to_string(), Value::from(a)), ("b".to_string(), Value::from(b))].into()
}

#[tokio::test]
async fn demo_blueprints_run_in_both_formats() {
    for name in ["pythagorean.yaml", "pythagorean.json"] {
        let blueprint = load_blueprint(demo(name), options()).unwrap();
        assert_eq!(blueprint.label(), "Pythagorean Theorem");
        validate_blueprint(&blueprint).unwrap();

        let result = blueprint.invoke(HashMap::new()).await.unwrap();
        assert_eq!(result, Some(Value::from(5.0)), "{}", name);
        let result = blueprint.invoke(args(5, 12)).await.unwrap();
        assert_eq!(result, Some(Value::from(13.0)), "{}", name);
    }
}

#[test]
fn dumping_a_loaded_blueprint_reproduces_its_record() {
    let record: BlueprintRecord = read_data(demo("pythagorean.yaml")).unwrap();
    let blueprint = parse_blueprint(&record, options()).unwrap();
    assert_eq!(dump_blueprint(&blueprint), record);

    let json: BlueprintRecord = read_data(demo("pythagorean.json")).unwrap();
    assert_eq!(json, record);
}

#[test]
fn unchanged_defaults_are_not_saved() {
    let mut record = BlueprintRecord::default();
    let mut pow = NodeRecord::new("math.Pow");
    pow.set.insert("exponent".to_string(), Value::from(2));
    record.nodes.insert("p".to_string(), pow);
    let mut inner = NodeRecord::new("math.Add");
    inner.set.insert("a".to_string(), Value::from(1));
    let mut group = NodeRecord::new("math.Add");
    group.nodes.insert("inner".to_string(), inner);
    group.connect.insert("value".to_string(), vec!["group.inner.b".to_string()]);
    record.nodes.insert("group".to_string(), group);

    let blueprint = parse_blueprint(&record, options()).unwrap();
    let dumped = dump_blueprint(&blueprint);
    assert!(dumped.nodes["p"].set.is_empty());
    assert_eq!(dumped.nodes["group"].nodes["inner"].set["a"], Value::from(1));
    assert_eq!(dumped.nodes["group"].connect["value"], vec!["group.inner.b"]);
}

#[test]
fn unknown_types_fail_to_load() {
    let mut record = BlueprintRecord::default();
    record
        .nodes
        .insert("x".to_string(), NodeRecord::new("math.Missing"));
    assert!(matches!(
        parse_blueprint(&record, options()),
        Err(PersistError::Flow(FlowError::Graph(GraphError::TypeNotFound(_))))
    ));
}

#[test]
fn save_then_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("copy.json");
    let original = load_blueprint(demo("pythagorean.yaml"), options()).unwrap();
    save_blueprint(&path, &original).unwrap();

    let copy = load_blueprint(&path, options()).unwrap();
    assert_eq!(dump_blueprint(&copy), dump_blueprint(&original));
    assert!(matches!(
        save_blueprint(dir.path().join("copy.txt"), &original),
        Err(PersistError::UnknownFormat(_))
    ));
}

#[test]
fn cyclic_wiring_is_rejected_before_running() {
    let mut record = BlueprintRecord::default();
    let mut x = NodeRecord::new("math.Add");
    x.connect.insert("value".to_string(), vec!["y.a".to_string()]);
    let mut y = NodeRecord::new("math.Add");
    y.connect.insert("value".to_string(), vec!["x.a".to_string()]);
    record.nodes.insert("x".to_string(), x);
    record.nodes.insert("y".to_string(), y);

    let blueprint = parse_blueprint(&record, options()).unwrap();
    assert!(matches!(
        validate_blueprint(&blueprint),
        Err(FlowError::Graph(GraphError::CyclicResolution(_)))
    ));
}

#[tokio::test]
async fn filesystem_driver_resolves_default_extension() {
    let dir = tempfile::tempdir().unwrap();
    let driver = FilesystemDriver::new(dir.path());
    let blueprint = load_blueprint(demo("pythagorean.yaml"), options()).unwrap();

    driver.save_blueprint("nested/pyth", &blueprint).await.unwrap();
    driver.save_blueprint("other.json", &blueprint).await.unwrap();
    assert!(dir.path().join("nested/pyth.yaml").is_file());
    assert!(dir.path().join("other.json").is_file());

    let listed = driver.list_blueprints().await.unwrap();
    assert_eq!(listed, vec!["nested/pyth", "other.json"]);

    let loaded = driver.load_blueprint("nested/pyth", options()).await.unwrap();
    assert_eq!(loaded.invoke(HashMap::new()).await.unwrap(), Some(Value::from(5.0)));
    let loaded = driver.load_blueprint("other.json", options()).await.unwrap();
    assert_eq!(loaded.walk_nodes().count(), 7);
}

#[tokio::test]
async fn runtime_runs_stored_blueprints_and_reports_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        storage: Some(StorageConfig {
            root: dir.path().to_path_buf(),
            default_extension: ".json".to_string(),
        }),
        ..RuntimeConfig::default()
    };
    let runtime = LoomRuntime::with_config(standard_library(), &config);
    let mut events = runtime.subscribe_events();
    assert!(runtime.list().await.unwrap().is_empty());
    assert!(runtime.load("countdown").await.is_err());

    let storage = Storage::new(FilesystemDriver::new(demo("")));
    let countdown = storage.load_blueprint("countdown", runtime.blueprint_options()).await.unwrap();
    runtime.save("countdown", &countdown).await.unwrap();
    assert_eq!(runtime.list().await.unwrap(), vec!["countdown"]);

    let result = runtime.run("countdown", HashMap::new()).await.unwrap();
    let expected = Value::Object([("status".to_string(), Value::from("liftoff"))].into());
    assert_eq!(result, Some(expected));

    let first = events.recv().await.unwrap();
    assert_eq!(first.name(), "blueprint_started");
}

#[tokio::test]
async fn zero_event_buffer_still_builds_a_runtime() {
    let config: RuntimeConfig = parse_data("event_buffer_size: 0\n", Format::Yaml).unwrap();
    assert_eq!(config.event_buffer_size, 0);

    let runtime = LoomRuntime::with_config(standard_library(), &config);
    let mut events = runtime.subscribe_events();
    let blueprint = load_blueprint(demo("pythagorean.yaml"), runtime.blueprint_options()).unwrap();
    let result = runtime.execute(&blueprint, HashMap::new()).await.unwrap();
    assert_eq!(result, Some(Value::from(5.0)));
    // A one-slot buffer keeps only the latest event.
    let last = match events.recv().await {
        Err(RecvError::Lagged(_)) => events.recv().await.unwrap(),
        other => other.unwrap(),
    };
    assert_eq!(last.name(), "blueprint_finished");
}

#[test]
fn library_config_filters_groups() {
    let config = RuntimeConfig {
        library: LibraryConfig {
            groups: vec!["math".to_string()],
            extends_default: false,
            version: "1.2".to_string(),
        },
        ..RuntimeConfig::default()
    };
    let runtime = LoomRuntime::with_config(standard_library(), &config);
    assert!(runtime.library().contains("math.Add"));
    assert!(!runtime.library().contains("flow.Input"));

    let record = dump_library(runtime.library());
    assert_eq!(record.version, "1.2");
    assert!(record.nodes.iter().all(|schema| schema.group == "math"));
    assert_eq!(record.blueprints[0].signals, vec!["on_run", "on_setup", "on_teardown"]);
}

#[test]
fn library_dump_describes_ports() {
    let record = dump_library(&standard_library());
    let pow = record
        .nodes
        .iter()
        .find(|schema| schema.group == "math" && schema.name == "Pow")
        .unwrap();
    let exponent = pow.ports.iter().find(|port| port.name == "exponent").unwrap();
    assert_eq!(exponent.default, Value::from(2));
    assert_eq!(exponent.value_type, "number");
    assert!(pow.ports.iter().any(|port| port.name == "value" && port.computed));
}
