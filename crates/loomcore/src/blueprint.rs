//! Run roots.
//!
//! A blueprint is a node flagged as a run root. Invoking it attaches a fresh
//! [`ExecutionContext`], runs setup hooks on every descendant, emits
//! `on_setup`, `on_run` and `on_teardown` in order and converts structured
//! early exits into results.

use crate::context::{ExecutionContext, Phase};
use crate::events::Event;
use crate::node::{Inert, Node, NodeOptions, NodeRef};
use crate::schema::Schema;
use crate::{FlowError, Result, Value};
use chrono::Utc;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

pub const ON_SETUP: &str = "on_setup";
pub const ON_RUN: &str = "on_run";
pub const ON_TEARDOWN: &str = "on_teardown";

pub fn blueprint_schema() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Schema::builder("blueprint", "Blueprint")
                .description("Root of an executable node graph")
                .blueprint()
                .signal(ON_SETUP)
                .signal(ON_RUN)
                .signal(ON_TEARDOWN)
                .build()
        })
        .clone()
}

#[derive(Debug, Clone)]
pub struct Blueprint {
    node: NodeRef,
}

impl Blueprint {
    pub fn new() -> Result<Self> {
        Self::with_options(NodeOptions::new())
    }

    pub fn with_options(options: NodeOptions) -> Result<Self> {
        let node = Node::build(blueprint_schema(), Box::new(Inert), options)?;
        Ok(Self { node })
    }

    /// Wraps a node whose type is a run root.
    pub fn from_node(node: NodeRef) -> Option<Self> {
        node.schema().is_blueprint().then_some(Self { node })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn into_node(self) -> NodeRef {
        self.node
    }

    /// Idle unless a run is in progress.
    pub fn phase(&self) -> Phase {
        self.node.context().map_or(Phase::Idle, |ctx| ctx.phase())
    }

    /// Runs the blueprint once. Concurrent invocations each get their own
    /// context, scoped to the task that awaits them; work spawned onto other
    /// tasks sees only the most recently attached run.
    pub async fn invoke(&self, args: HashMap<String, Value>) -> Result<Option<Value>> {
        self.invoke_with_state(args, HashMap::new()).await
    }

    /// Runs setup, run and teardown under a fresh context. Teardown runs even
    /// when setup or run fail; the first error wins.
    pub async fn invoke_with_state(
        &self,
        args: HashMap<String, Value>,
        state: HashMap<String, Value>,
    ) -> Result<Option<Value>> {
        let context = Arc::new(ExecutionContext::new(args, state));
        let _attached = AttachedContext::new(&self.node, context.clone());
        self.node
            .scope_context(context.clone(), self.execute(&context))
            .await
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<Option<Value>> {
        let started = Instant::now();

        tracing::info!(execution_id = %context.id(), blueprint = %self.node.id(), "starting blueprint");
        self.node.dispatch(Event::BlueprintStarted {
            execution_id: context.id(),
            blueprint: self.node.id().to_string(),
            timestamp: Utc::now(),
        });

        let outcome = match self.setup(context).await {
            Ok(()) => self.run(context).await,
            Err(e) => Err(e),
        };
        let teardown = self.teardown(context).await;
        context.set_phase(Phase::Idle);

        let result = match (outcome, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(execution_id = %context.id(), duration_ms, "blueprint finished"),
            Err(e) => tracing::error!(execution_id = %context.id(), duration_ms, error = %e, "blueprint failed"),
        }
        self.node.dispatch(Event::BlueprintFinished {
            execution_id: context.id(),
            blueprint: self.node.id().to_string(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });
        result
    }

    pub async fn setup(&self, context: &ExecutionContext) -> Result<()> {
        context.set_phase(Phase::Setup);
        for node in self.node.walk_nodes() {
            node.behavior().setup(&node).await?;
        }
        self.node.emit(ON_SETUP, Vec::new()).await
    }

    /// Emits `on_run`; an early return yields its value, otherwise the
    /// collected results (if any).
    pub async fn run(&self, context: &ExecutionContext) -> Result<Option<Value>> {
        context.set_phase(Phase::Running);
        match self.node.emit(ON_RUN, Vec::new()).await {
            Ok(()) | Err(FlowError::Exit(0)) => {}
            Err(FlowError::Return(value)) => return Ok(Some(value)),
            Err(e) => return Err(e),
        }
        let results = context.results();
        Ok((!results.is_empty()).then_some(Value::Object(results)))
    }

    pub async fn teardown(&self, context: &ExecutionContext) -> Result<()> {
        context.set_phase(Phase::Teardown);
        let mut first_error = self.node.emit(ON_TEARDOWN, Vec::new()).await.err();
        for node in self.node.walk_nodes() {
            if let Err(e) = node.behavior().teardown(&node).await {
                tracing::warn!(node = %node.id(), error = %e, "teardown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Deref for Blueprint {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

/// Keeps the context attached for the duration of a run.
struct AttachedContext<'a> {
    node: &'a Node,
    context: Arc<ExecutionContext>,
}

impl<'a> AttachedContext<'a> {
    fn new(node: &'a Node, context: Arc<ExecutionContext>) -> Self {
        node.attach_context(context.clone());
        Self { node, context }
    }
}

impl Drop for AttachedContext<'_> {
    fn drop(&mut self) {
        self.node.detach_context(&self.context);
    }
}
