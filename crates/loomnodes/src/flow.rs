//! Flow control nodes: blueprint inputs and outputs, early exits, loops,
//! branching, joins and execution-state access.

use async_trait::async_trait;
use loomcore::{
    Behavior, Blueprint, Callback, ExecutionContext, FlowError, NodeError, NodeRef, NodeType,
    Result, Schema, Value, ValueType, ON_RUN,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GROUP: &str = "flow";

fn context(node: &NodeRef) -> Result<Arc<ExecutionContext>> {
    node.context().ok_or_else(|| {
        NodeError::ExecutionFailed(format!("{} is not part of a running blueprint", node.id())).into()
    })
}

fn blueprint(node: &NodeRef) -> Result<Blueprint> {
    node.blueprint().ok_or_else(|| {
        NodeError::ExecutionFailed(format!("{} is not inside a blueprint", node.id())).into()
    })
}

fn unknown_slot(node: &NodeRef, slot: &str) -> Result<()> {
    Err(NodeError::UnknownSlot {
        node: node.id().to_string(),
        slot: slot.to_string(),
    }
    .into())
}

/// Non-empty string value of a port, if any.
async fn text(node: &NodeRef, port: &str) -> Result<Option<String>> {
    Ok(node
        .get(port)
        .await?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// Reads a blueprint argument keyed by the node's label or id
pub struct InputNode;

#[async_trait]
impl Behavior for InputNode {
    async fn compute(&self, node: &NodeRef, _port: &str) -> Result<Value> {
        let key = node.explicit_label().unwrap_or_else(|| node.id().to_string());
        let arg = node.context().and_then(|ctx| ctx.arg(&key).cloned());
        match arg {
            Some(value) => Ok(value),
            None => node.get("default").await,
        }
    }
}

/// Stores a value into the run's results
pub struct OutputNode;

#[async_trait]
impl Behavior for OutputNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let name = text(node, "name").await?.unwrap_or_else(|| node.label());
        let value = node.get("value").await?;
        context(node)?.insert_result(name, value);
        node.emit("assigned", Vec::new()).await
    }
}

pub struct ReturnNode;

#[async_trait]
impl Behavior for ReturnNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        Err(FlowError::Return(node.get("value").await?))
    }
}

pub struct ExitNode;

#[async_trait]
impl Behavior for ExitNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let code = match node.get("code").await? {
            Value::Null => 0,
            value => value
                .as_i64()
                .and_then(|code| i32::try_from(code).ok())
                .ok_or_else(|| NodeError::Configuration(format!("invalid exit code {}", value)))?,
        };
        Err(FlowError::Exit(code))
    }
}

/// Emits `triggered` whenever the named blueprint signal fires
#[derive(Default)]
pub struct OnNode {
    binding: Mutex<Option<(String, Arc<Callback>)>>,
}

#[async_trait]
impl Behavior for OnNode {
    async fn setup(&self, node: &NodeRef) -> Result<()> {
        let event = text(node, "event").await?.unwrap_or_else(|| ON_RUN.to_string());
        let weak = Arc::downgrade(node);
        let callback = Callback::new(format!("{}.triggered", node.id()), Vec::new(), move |_| {
            let node = weak.upgrade();
            async move {
                match node {
                    Some(node) => node.emit("triggered", Vec::new()).await,
                    None => Ok(()),
                }
            }
        });
        blueprint(node)?.signal(&event)?.connect(&callback)?;
        tracing::debug!(node = %node.id(), event = %event, "bound to blueprint signal");
        *self.binding.lock() = Some((event, callback));
        Ok(())
    }

    async fn teardown(&self, node: &NodeRef) -> Result<()> {
        let binding = self.binding.lock().take();
        if let (Some((event, callback)), Some(blueprint)) = (binding, node.blueprint()) {
            blueprint.signal(&event)?.disconnect(callback);
        }
        Ok(())
    }
}

/// Emits a blueprint signal by name
pub struct EmitNode;

#[async_trait]
impl Behavior for EmitNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let event = text(node, "event").await?.ok_or_else(|| {
            NodeError::Configuration(format!("{} has no event to emit", node.id()))
        })?;
        blueprint(node)?.emit(&event, Vec::new()).await
    }
}

/// Cancellation shared between a loop's `run` and `cancel` slots.
#[derive(Default)]
struct CancelFlag {
    token: Mutex<CancellationToken>,
}

impl CancelFlag {
    fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();
        token
    }

    fn cancel(&self) {
        self.token.lock().cancel();
    }
}

/// Emits `cancelled` or `finished` depending on how a loop ended.
async fn end_loop(node: &NodeRef, token: &CancellationToken) -> Result<()> {
    let signal = if token.is_cancelled() { "cancelled" } else { "finished" };
    node.emit(signal, Vec::new()).await
}

/// Counts from `start` towards `stop` by `interval`
#[derive(Default)]
pub struct ForNode {
    cancel: CancelFlag,
}

#[async_trait]
impl Behavior for ForNode {
    async fn call(&self, node: &NodeRef, slot: &str, _args: Vec<Value>) -> Result<()> {
        match slot {
            "run" => {
                let token = self.cancel.reset();
                let bounds: Vec<i64> = node
                    .gather(&["start", "stop", "interval"])
                    .await?
                    .iter()
                    .map(|v| v.as_i64().unwrap_or_default())
                    .collect();
                let (start, stop, interval) = (bounds[0], bounds[1], bounds[2]);
                if interval == 0 {
                    return Err(NodeError::Configuration(format!(
                        "{}: interval must not be zero",
                        node.id()
                    ))
                    .into());
                }

                let mut index = start;
                while (interval > 0 && index < stop) || (interval < 0 && index > stop) {
                    node.set("index", index)?;
                    node.emit("index_changed", Vec::new()).await?;
                    if token.is_cancelled() {
                        break;
                    }
                    index += interval;
                }
                end_loop(node, &token).await
            }
            "cancel" => {
                self.cancel.cancel();
                Ok(())
            }
            other => unknown_slot(node, other),
        }
    }
}

/// Walks a sequence, optionally publishing each position too
#[derive(Default)]
pub struct IterateNode {
    cancel: CancelFlag,
    enumerate: bool,
}

impl IterateNode {
    pub fn enumerating() -> Self {
        Self {
            enumerate: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Behavior for IterateNode {
    async fn call(&self, node: &NodeRef, slot: &str, _args: Vec<Value>) -> Result<()> {
        match slot {
            "run" => {
                let token = self.cancel.reset();
                let items = node.get("items").await?;
                for (index, item) in items.as_array().unwrap_or_default().iter().enumerate() {
                    if self.enumerate {
                        node.set("index", index)?;
                    }
                    node.set("item", item.clone())?;
                    node.emit("item_changed", Vec::new()).await?;
                    if token.is_cancelled() {
                        break;
                    }
                }
                end_loop(node, &token).await
            }
            "cancel" => {
                self.cancel.cancel();
                Ok(())
            }
            other => unknown_slot(node, other),
        }
    }
}

/// Emits `triggered` while `condition` resolves truthy
#[derive(Default)]
pub struct WhileNode {
    cancel: CancelFlag,
}

#[async_trait]
impl Behavior for WhileNode {
    async fn call(&self, node: &NodeRef, slot: &str, _args: Vec<Value>) -> Result<()> {
        match slot {
            "run" => {
                let token = self.cancel.reset();
                while node.get("condition").await?.is_truthy() {
                    node.emit("triggered", Vec::new()).await?;
                    if token.is_cancelled() {
                        break;
                    }
                }
                end_loop(node, &token).await
            }
            "cancel" => {
                self.cancel.cancel();
                Ok(())
            }
            other => unknown_slot(node, other),
        }
    }
}

pub struct IfNode;

#[async_trait]
impl Behavior for IfNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let signal = if node.get("condition").await?.is_truthy() {
            "passed"
        } else {
            "failed"
        };
        node.emit(signal, Vec::new()).await
    }
}

/// Joins concurrent triggers: `finished` fires once every connected
/// signal has called `continue_`.
#[derive(Default)]
pub struct WaitForAllNode {
    counter: tokio::sync::Mutex<usize>,
    total: AtomicUsize,
}

#[async_trait]
impl Behavior for WaitForAllNode {
    async fn setup(&self, node: &NodeRef) -> Result<()> {
        *self.counter.lock().await = 0;
        let total = node.slot("continue_")?.connection_count();
        self.total.store(total, Ordering::SeqCst);
        Ok(())
    }

    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let finished = {
            let mut counter = self.counter.lock().await;
            *counter += 1;
            let total = self.total.load(Ordering::SeqCst);
            tracing::trace!(node = %node.id(), counter = *counter, total, "continue");
            *counter == total
        };
        if finished {
            node.emit("finished", Vec::new()).await?;
        }
        Ok(())
    }
}

pub struct SleepNode;

#[async_trait]
impl Behavior for SleepNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let seconds = node.get("seconds").await?.as_f64().unwrap_or_default().max(0.0);
        let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
            NodeError::Configuration(format!("invalid sleep of {} seconds: {}", seconds, e))
        })?;
        tokio::time::sleep(duration).await;
        node.emit("finished", Vec::new()).await
    }
}

/// Reads a key from the run's state
pub struct GetNode;

#[async_trait]
impl Behavior for GetNode {
    async fn compute(&self, node: &NodeRef, _port: &str) -> Result<Value> {
        let key = text(node, "key")
            .await?
            .or_else(|| node.explicit_label())
            .unwrap_or_else(|| node.id().to_string());
        let stored = node.context().and_then(|ctx| ctx.state(&key));
        match stored {
            Some(value) => Ok(value),
            None => node.get("default").await,
        }
    }
}

/// Writes a key into the run's state
pub struct SetNode;

#[async_trait]
impl Behavior for SetNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let key = text(node, "key").await?.unwrap_or_else(|| node.label());
        let value = node.get("value").await?;
        context(node)?.set_state(key, value);
        node.emit("stored", Vec::new()).await
    }
}

fn loop_schema(name: &str, description: &str) -> loomcore::SchemaBuilder {
    Schema::builder(GROUP, name)
        .description(description)
        .signal("cancelled")
        .signal("finished")
        .slot("run")
        .slot("cancel")
}

pub fn node_types() -> Vec<NodeType> {
    vec![
        NodeType::new(
            Schema::builder(GROUP, "Input")
                .description("Reads a blueprint argument by label or id")
                .input("default", ValueType::Any)
                .computed("value", ValueType::Any)
                .build(),
            || Box::new(InputNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Output")
                .description("Stores a value into the run results")
                .input("name", ValueType::String)
                .input("value", ValueType::Any)
                .signal("assigned")
                .slot("assign")
                .build(),
            || Box::new(OutputNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Return")
                .description("Ends the run with a value")
                .input("value", ValueType::Any)
                .slot("return_")
                .build(),
            || Box::new(ReturnNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Exit")
                .description("Ends the run with an exit code")
                .input_with_default("code", ValueType::Integer, 0)
                .slot("exit_")
                .build(),
            || Box::new(ExitNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "On")
                .description("Triggers when a blueprint signal fires")
                .input_with_default("event", ValueType::String, ON_RUN)
                .signal("triggered")
                .build(),
            || Box::new(OnNode::default()),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Emit")
                .description("Emits a blueprint signal")
                .input("event", ValueType::String)
                .slot("emit")
                .build(),
            || Box::new(EmitNode),
        ),
        NodeType::new(
            loop_schema("For", "Counts from start to stop")
                .input_with_default("start", ValueType::Integer, 0)
                .input_with_default("stop", ValueType::Integer, 10)
                .input_with_default("interval", ValueType::Integer, 1)
                .output("index", ValueType::Integer)
                .signal("index_changed")
                .build(),
            || Box::new(ForNode::default()),
        ),
        NodeType::new(
            loop_schema("Iterate", "Iterates over a sequence")
                .input("items", ValueType::sequence(ValueType::Any))
                .output("item", ValueType::Any)
                .signal("item_changed")
                .build(),
            || Box::new(IterateNode::default()),
        ),
        NodeType::new(
            loop_schema("Enumerate", "Iterates over a sequence with indices")
                .input("items", ValueType::sequence(ValueType::Any))
                .output("index", ValueType::Integer)
                .output("item", ValueType::Any)
                .signal("item_changed")
                .build(),
            || Box::new(IterateNode::enumerating()),
        ),
        NodeType::new(
            loop_schema("While", "Loops while a condition holds")
                .input("condition", ValueType::Any)
                .signal("triggered")
                .build(),
            || Box::new(WhileNode::default()),
        ),
        NodeType::new(
            Schema::builder(GROUP, "If")
                .description("Branches on a condition")
                .input("condition", ValueType::Any)
                .signal("passed")
                .signal("failed")
                .slot("check")
                .build(),
            || Box::new(IfNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "WaitForAll")
                .description("Waits for every connected trigger")
                .signal("finished")
                .slot("continue_")
                .build(),
            || Box::new(WaitForAllNode::default()),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Sleep")
                .description("Waits for a number of seconds")
                .input_with_default("seconds", ValueType::Number, 1)
                .signal("finished")
                .slot("sleep")
                .build(),
            || Box::new(SleepNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Get")
                .description("Reads a value from the run state")
                .input("key", ValueType::String)
                .input("default", ValueType::Any)
                .computed("value", ValueType::Any)
                .build(),
            || Box::new(GetNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Set")
                .description("Writes a value to the run state")
                .input("key", ValueType::String)
                .input("value", ValueType::Any)
                .signal("stored")
                .slot("store")
                .build(),
            || Box::new(SetNode),
        ),
    ]
}
