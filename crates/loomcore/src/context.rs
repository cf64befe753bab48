use crate::events::ExecutionId;
use crate::Value;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Lifecycle phase of a blueprint run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Setup,
    Running,
    Teardown,
}

/// Per-run state shared by every node of the running blueprint.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ExecutionId,
    args: HashMap<String, Value>,
    state: Mutex<HashMap<String, Value>>,
    results: Mutex<BTreeMap<String, Value>>,
    phase: RwLock<Phase>,
}

impl ExecutionContext {
    pub fn new(args: HashMap<String, Value>, state: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            args,
            state: Mutex::new(state),
            results: Mutex::new(BTreeMap::new()),
            phase: RwLock::new(Phase::Idle),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn args(&self) -> &HashMap<String, Value> {
        &self.args
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn state(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.lock().insert(key.into(), value);
    }

    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.state.lock().clone()
    }

    pub fn insert_result(&self, key: impl Into<String>, value: Value) {
        self.results.lock().insert(key.into(), value);
    }

    pub fn results(&self) -> BTreeMap<String, Value> {
        self.results.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.phase.write() = phase;
    }
}
