use async_trait::async_trait;
use loomcore::{Behavior, NodeRef, NodeType, Result, Schema, Value, ValueType};

pub const GROUP: &str = "log";

pub const LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARN", "ERROR", "CRITICAL"];

/// Prints its message to stdout
pub struct PrintNode;

#[async_trait]
impl Behavior for PrintNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        println!("{}", node.get("message").await?);
        node.emit("printed", Vec::new()).await
    }
}

/// Writes its message through `tracing` at the chosen level
pub struct LogNode;

#[async_trait]
impl Behavior for LogNode {
    async fn call(&self, node: &NodeRef, _slot: &str, _args: Vec<Value>) -> Result<()> {
        let values = node.gather(&["logger", "level", "message"]).await?;
        let logger = values[0].as_str().unwrap_or("root");
        let message = &values[2];
        match values[1].as_str().unwrap_or("INFO") {
            "DEBUG" => tracing::debug!(logger, "{}", message),
            "WARN" => tracing::warn!(logger, "{}", message),
            "ERROR" | "CRITICAL" => tracing::error!(logger, "{}", message),
            _ => tracing::info!(logger, "{}", message),
        }
        node.emit("logged", Vec::new()).await
    }
}

pub fn node_types() -> Vec<NodeType> {
    vec![
        NodeType::new(
            Schema::builder(GROUP, "Print")
                .description("Prints a message")
                .input("message", ValueType::Any)
                .signal("printed")
                .slot("print_")
                .build(),
            || Box::new(PrintNode),
        ),
        NodeType::new(
            Schema::builder(GROUP, "Log")
                .description("Logs a message")
                .input_with_default("logger", ValueType::String, "root")
                .input_with_default("level", ValueType::choice(LEVELS), "INFO")
                .input("message", ValueType::Any)
                .signal("logged")
                .slot("log")
                .build(),
            || Box::new(LogNode),
        ),
    ]
}
