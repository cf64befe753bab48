//! Signal/slot event dispatch.
//!
//! A [`Signal`] multicasts its arguments to every live receiver and joins
//! them. Receivers are [`Slot`]s owned by nodes or free-standing
//! [`Callback`]s; the signal only keeps weak handles, so a receiver whose
//! owner goes away (or whose node was deleted) is pruned on the next emit or
//! inspection.

use crate::error::{GraphError, NodeError};
use crate::events::Event;
use crate::node::{Node, NodeRef};
use crate::{Result, Value, ValueType};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A named callable bound to a receiver node
pub struct Slot {
    name: String,
    params: Vec<ValueType>,
    receiver: Weak<Node>,
    receiver_id: String,
    connections: AtomicUsize,
}

impl Slot {
    pub(crate) fn new(name: &str, params: Vec<ValueType>, receiver: Weak<Node>, receiver_id: &str) -> Self {
        Self {
            name: name.to_string(),
            params,
            receiver,
            receiver_id: receiver_id.to_string(),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn receiver(&self) -> Option<NodeRef> {
        self.receiver.upgrade()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.receiver_id, self.name)
    }

    /// Number of signals currently targeting this slot.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn is_live(&self) -> bool {
        self.receiver.upgrade().is_some_and(|node| node.is_alive())
    }

    /// Calls the receiver node's slot handler, reporting through its middleware.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<()> {
        let node = self
            .receiver
            .upgrade()
            .ok_or_else(|| NodeError::Dropped(self.receiver_id.clone()))?;
        if args.len() != self.params.len() {
            return Err(GraphError::SignatureMismatch {
                signal: "<direct call>".to_string(),
                receiver: self.qualified_name(),
                reason: format!("expected {} argument(s), got {}", self.params.len(), args.len()),
            }
            .into());
        }

        node.dispatch(Event::NodeEntered {
            node_id: node.id().to_string(),
            node_type: node.type_name(),
            slot: self.name.clone(),
            timestamp: chrono::Utc::now(),
        });
        let result = node.behavior().call(&node, &self.name, args).await;
        match &result {
            Err(err) if !err.is_control_flow() => node.dispatch(Event::NodeErrored {
                node_id: node.id().to_string(),
                node_type: node.type_name(),
                slot: self.name.clone(),
                error: err.to_string(),
                timestamp: chrono::Utc::now(),
            }),
            _ => node.dispatch(Event::NodeExited {
                node_id: node.id().to_string(),
                node_type: node.type_name(),
                slot: self.name.clone(),
                timestamp: chrono::Utc::now(),
            }),
        }
        result
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.qualified_name())
            .field("params", &self.params)
            .field("connections", &self.connection_count())
            .finish()
    }
}

type CallbackFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Free-standing async receiver, kept alive by whoever created it
pub struct Callback {
    name: String,
    params: Vec<ValueType>,
    func: Box<CallbackFn>,
}

impl Callback {
    pub fn new<F, Fut>(name: impl Into<String>, params: Vec<ValueType>, func: F) -> Arc<Self>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            params,
            func: Box::new(move |args| func(args).boxed()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub async fn invoke(&self, args: Vec<Value>) -> Result<()> {
        (self.func)(args).await
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Strong handle to something a signal can call
#[derive(Clone, Debug)]
pub enum Handler {
    Slot(Arc<Slot>),
    Callback(Arc<Callback>),
}

impl Handler {
    pub fn params(&self) -> &[ValueType] {
        match self {
            Handler::Slot(slot) => slot.params(),
            Handler::Callback(callback) => callback.params(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Handler::Slot(slot) => slot.qualified_name(),
            Handler::Callback(callback) => callback.name().to_string(),
        }
    }

    pub fn as_slot(&self) -> Option<&Arc<Slot>> {
        match self {
            Handler::Slot(slot) => Some(slot),
            Handler::Callback(_) => None,
        }
    }

    pub async fn invoke(&self, args: Vec<Value>) -> Result<()> {
        match self {
            Handler::Slot(slot) => slot.invoke(args).await,
            Handler::Callback(callback) => callback.invoke(args).await,
        }
    }

    fn downgrade(&self) -> Receiver {
        match self {
            Handler::Slot(slot) => Receiver::Slot(Arc::downgrade(slot)),
            Handler::Callback(callback) => Receiver::Callback(Arc::downgrade(callback)),
        }
    }

    fn address(&self) -> usize {
        match self {
            Handler::Slot(slot) => Arc::as_ptr(slot) as *const () as usize,
            Handler::Callback(callback) => Arc::as_ptr(callback) as *const () as usize,
        }
    }
}

impl From<Arc<Slot>> for Handler {
    fn from(slot: Arc<Slot>) -> Self {
        Handler::Slot(slot)
    }
}

impl From<&Arc<Slot>> for Handler {
    fn from(slot: &Arc<Slot>) -> Self {
        Handler::Slot(slot.clone())
    }
}

impl From<Arc<Callback>> for Handler {
    fn from(callback: Arc<Callback>) -> Self {
        Handler::Callback(callback)
    }
}

impl From<&Arc<Callback>> for Handler {
    fn from(callback: &Arc<Callback>) -> Self {
        Handler::Callback(callback.clone())
    }
}

#[derive(Clone)]
enum Receiver {
    Slot(Weak<Slot>),
    Callback(Weak<Callback>),
}

impl Receiver {
    fn address(&self) -> usize {
        match self {
            Receiver::Slot(slot) => slot.as_ptr() as *const () as usize,
            Receiver::Callback(callback) => callback.as_ptr() as *const () as usize,
        }
    }
}

/// Multicast event source owned by a sender node
pub struct Signal {
    name: String,
    params: Vec<ValueType>,
    sender_id: String,
    receivers: RwLock<Vec<Receiver>>,
}

impl Signal {
    /// A signal with no sender node, for wiring plain callbacks.
    pub fn new(name: impl Into<String>, params: Vec<ValueType>) -> Self {
        Self {
            name: name.into(),
            params,
            sender_id: String::new(),
            receivers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn owned(name: &str, params: Vec<ValueType>, sender_id: &str) -> Self {
        Self {
            name: name.to_string(),
            params,
            sender_id: sender_id.to_string(),
            receivers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn qualified_name(&self) -> String {
        if self.sender_id.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.sender_id, self.name)
        }
    }

    /// Adds a receiver after checking it can accept this signal's arguments.
    pub fn connect(&self, handler: impl Into<Handler>) -> Result<()> {
        let handler = handler.into();
        self.validate(&handler)?;
        self.attach(&handler);
        Ok(())
    }

    /// Adds several receivers; nothing is added unless all of them are compatible.
    pub fn connect_all<I>(&self, handlers: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Handler>,
    {
        let handlers: Vec<Handler> = handlers.into_iter().map(Into::into).collect();
        for handler in &handlers {
            self.validate(handler)?;
        }
        for handler in &handlers {
            self.attach(handler);
        }
        Ok(())
    }

    fn validate(&self, handler: &Handler) -> Result<()> {
        let accepted = handler.params();
        let mismatch = |reason: String| GraphError::SignatureMismatch {
            signal: self.qualified_name(),
            receiver: handler.name(),
            reason,
        };
        if accepted.len() != self.params.len() {
            return Err(mismatch(format!(
                "signal sends {} argument(s), receiver takes {}",
                self.params.len(),
                accepted.len()
            ))
            .into());
        }
        for (index, (sent, wanted)) in self.params.iter().zip(accepted).enumerate() {
            if !wanted.accepts(sent) {
                return Err(mismatch(format!(
                    "argument {} is {}, receiver expects {}",
                    index, sent, wanted
                ))
                .into());
            }
        }
        Ok(())
    }

    fn attach(&self, handler: &Handler) {
        let address = handler.address();
        let mut receivers = self.receivers.write();
        if receivers.iter().any(|r| r.address() == address) {
            return;
        }
        receivers.push(handler.downgrade());
        if let Handler::Slot(slot) = handler {
            slot.connections.fetch_add(1, Ordering::SeqCst);
        }
        tracing::debug!(signal = %self.qualified_name(), receiver = %handler.name(), "connected signal");
    }

    /// Removes one receiver.
    pub fn disconnect(&self, handler: impl Into<Handler>) {
        let address = handler.into().address();
        self.detach(|receiver| receiver.address() == address);
    }

    /// Removes every receiver.
    pub fn disconnect_all(&self) {
        self.detach(|_| true);
    }

    fn detach(&self, mut predicate: impl FnMut(&Receiver) -> bool) {
        let mut receivers = self.receivers.write();
        receivers.retain(|receiver| {
            if !predicate(receiver) {
                return true;
            }
            if let Receiver::Slot(slot) = receiver {
                if let Some(slot) = slot.upgrade() {
                    slot.connections.fetch_sub(1, Ordering::SeqCst);
                }
            }
            false
        });
    }

    /// Live receivers, pruning dead ones first.
    pub fn receivers(&self) -> Vec<Handler> {
        let mut receivers = self.receivers.write();
        let mut live = Vec::with_capacity(receivers.len());
        receivers.retain(|receiver| match receiver {
            Receiver::Slot(weak) => match weak.upgrade() {
                Some(slot) if slot.is_live() => {
                    live.push(Handler::Slot(slot));
                    true
                }
                Some(slot) => {
                    slot.connections.fetch_sub(1, Ordering::SeqCst);
                    false
                }
                None => false,
            },
            Receiver::Callback(weak) => match weak.upgrade() {
                Some(callback) => {
                    live.push(Handler::Callback(callback));
                    true
                }
                None => false,
            },
        });
        live
    }

    pub fn len(&self) -> usize {
        self.receivers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers().is_empty()
    }

    /// Calls every live receiver concurrently and waits for all of them.
    ///
    /// The first failing receiver aborts the join and its error (including
    /// Return/Exit conditions) is propagated.
    pub async fn emit(&self, args: Vec<Value>) -> Result<()> {
        if args.len() != self.params.len() {
            return Err(GraphError::SignatureMismatch {
                signal: self.qualified_name(),
                receiver: "<emit>".to_string(),
                reason: format!("expected {} argument(s), got {}", self.params.len(), args.len()),
            }
            .into());
        }
        let handlers = self.receivers();
        if handlers.is_empty() {
            return Ok(());
        }
        tracing::trace!(signal = %self.qualified_name(), receivers = handlers.len(), "emit");
        try_join_all(handlers.iter().map(|handler| handler.invoke(args.clone()))).await?;
        Ok(())
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.qualified_name())
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn counter_callback(name: &str, counter: Arc<AtomicUsize>) -> Arc<Callback> {
        Callback::new(name, Vec::new(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn dropped_callback_is_pruned_without_disconnect() {
        let signal = Signal::new("changed", Vec::new());
        let callback = counter_callback("cb", Arc::new(AtomicUsize::new(0)));
        signal.connect(&callback).unwrap();
        assert!(!signal.is_empty());

        drop(callback);
        assert!(signal.is_empty());
    }

    #[test]
    fn temporary_receiver_is_not_kept_alive() {
        let signal = Signal::new("changed", Vec::new());
        signal
            .connect(counter_callback("tmp", Arc::new(AtomicUsize::new(0))))
            .unwrap();
        assert!(signal.is_empty());
    }

    #[test]
    fn incompatible_receivers_are_rejected() {
        let signal = Signal::new("moved", vec![ValueType::Integer]);

        let too_few = Callback::new("too_few", vec![], |_| async { Ok(()) });
        let too_many = Callback::new(
            "too_many",
            vec![ValueType::Integer, ValueType::Integer],
            |_| async { Ok(()) },
        );
        let wrong_type = Callback::new("wrong_type", vec![ValueType::String], |_| async { Ok(()) });
        let wider = Callback::new("wider", vec![ValueType::Number], |_| async { Ok(()) });

        for bad in [&too_few, &too_many, &wrong_type] {
            let err = signal.connect(bad).unwrap_err();
            assert!(matches!(
                err,
                crate::FlowError::Graph(GraphError::SignatureMismatch { .. })
            ));
        }
        assert!(signal.is_empty());

        signal.connect(&wider).unwrap();
        assert_eq!(signal.len(), 1);
    }

    #[test]
    fn connect_all_is_all_or_nothing() {
        let signal = Signal::new("moved", vec![ValueType::Integer]);
        let good = Callback::new("good", vec![ValueType::Any], |_| async { Ok(()) });
        let bad = Callback::new("bad", vec![], |_| async { Ok(()) });
        assert!(signal.connect_all([&good, &bad]).is_err());
        assert!(signal.is_empty());
    }

    #[test]
    fn disconnect_removes_one_or_all() {
        let signal = Signal::new("changed", Vec::new());
        let a = counter_callback("a", Arc::new(AtomicUsize::new(0)));
        let b = counter_callback("b", Arc::new(AtomicUsize::new(0)));
        signal.connect_all([&a, &b]).unwrap();
        assert_eq!(signal.len(), 2);

        signal.disconnect(&a);
        assert_eq!(signal.len(), 1);

        signal.disconnect_all();
        assert!(signal.is_empty());
    }

    #[tokio::test]
    async fn emit_calls_every_receiver() {
        let signal = Signal::new("changed", Vec::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let callbacks: Vec<_> = (0..3)
            .map(|i| counter_callback(&format!("cb{}", i), counter.clone()))
            .collect();
        signal.connect_all(&callbacks).unwrap();

        signal.emit(vec![]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn emit_runs_receivers_concurrently() {
        let signal = Signal::new("go", Vec::new());
        let callbacks: Vec<_> = (0..10)
            .map(|i| {
                Callback::new(format!("sleeper{}", i), Vec::new(), |_| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                })
            })
            .collect();
        signal.connect_all(&callbacks).unwrap();

        let start = Instant::now();
        signal.emit(vec![]).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn emit_propagates_control_flow() {
        let signal = Signal::new("go", Vec::new());
        let returner = Callback::new("returner", Vec::new(), |_| async {
            Err(crate::FlowError::Return(Value::from(42)))
        });
        signal.connect(&returner).unwrap();

        match signal.emit(vec![]).await {
            Err(crate::FlowError::Return(value)) => assert_eq!(value, Value::from(42)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn emit_checks_argument_count() {
        let signal = Signal::new("moved", vec![ValueType::Integer]);
        assert!(signal.emit(vec![]).await.is_err());
        assert!(signal.emit(vec![Value::from(1)]).await.is_ok());
    }
}
