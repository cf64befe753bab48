//! Arithmetic and comparison nodes. Each exposes a computed `value` port
//! derived from its inputs on every read.

use async_trait::async_trait;
use loomcore::{Behavior, NodeError, NodeRef, NodeType, Result, Schema, Value, ValueType};

pub const GROUP: &str = "math";

type Operation = fn(&[Value]) -> std::result::Result<Value, String>;

/// Node computing `value` from a fixed set of inputs
pub struct FunctionNode {
    inputs: &'static [&'static str],
    operation: Operation,
}

impl FunctionNode {
    pub fn new(inputs: &'static [&'static str], operation: Operation) -> Self {
        Self { inputs, operation }
    }
}

#[async_trait]
impl Behavior for FunctionNode {
    async fn compute(&self, node: &NodeRef, _port: &str) -> Result<Value> {
        let args = node.gather(self.inputs).await?;
        (self.operation)(&args).map_err(|reason| {
            NodeError::ExecutionFailed(format!("{}: {}", node.id(), reason)).into()
        })
    }
}

fn number(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Null => Ok(0.0),
        other => other
            .as_f64()
            .ok_or_else(|| format!("expected a number, got {}", other.kind())),
    }
}

fn numbers<const N: usize>(args: &[Value]) -> std::result::Result<[f64; N], String> {
    let mut out = [0.0; N];
    for (slot, value) in out.iter_mut().zip(args) {
        *slot = number(value)?;
    }
    Ok(out)
}

fn add(args: &[Value]) -> std::result::Result<Value, String> {
    let [a, b] = numbers(args)?;
    Ok(Value::from(a + b))
}

fn subtract(args: &[Value]) -> std::result::Result<Value, String> {
    let [a, b] = numbers(args)?;
    Ok(Value::from(a - b))
}

fn multiply(args: &[Value]) -> std::result::Result<Value, String> {
    let [a, b] = numbers(args)?;
    Ok(Value::from(a * b))
}

fn divide(args: &[Value]) -> std::result::Result<Value, String> {
    let [a, b] = numbers(args)?;
    if b == 0.0 {
        return Err("division by zero".to_string());
    }
    Ok(Value::from(a / b))
}

fn pow(args: &[Value]) -> std::result::Result<Value, String> {
    let [base, exponent] = numbers(args)?;
    Ok(Value::from(base.powf(exponent)))
}

fn sqrt(args: &[Value]) -> std::result::Result<Value, String> {
    let [x] = numbers(args)?;
    if x < 0.0 {
        return Err(format!("square root of negative number {}", x));
    }
    Ok(Value::from(x.sqrt()))
}

fn negate(args: &[Value]) -> std::result::Result<Value, String> {
    let [x] = numbers(args)?;
    Ok(Value::from(-x))
}

fn greater(args: &[Value]) -> std::result::Result<Value, String> {
    let [a, b] = numbers(args)?;
    Ok(Value::from(a > b))
}

fn less(args: &[Value]) -> std::result::Result<Value, String> {
    let [a, b] = numbers(args)?;
    Ok(Value::from(a < b))
}

fn equal(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::from(args.first() == args.get(1)))
}

const BINARY: &[&str] = &["a", "b"];
const UNARY: &[&str] = &["x"];
const POW: &[&str] = &["base", "exponent"];

fn binary(name: &str, description: &str, output: ValueType, operation: Operation) -> NodeType {
    let schema = Schema::builder(GROUP, name)
        .description(description)
        .input_with_default("a", ValueType::Number, 0)
        .input_with_default("b", ValueType::Number, 0)
        .computed("value", output)
        .build();
    NodeType::new(schema, move || Box::new(FunctionNode::new(BINARY, operation)))
}

fn unary(name: &str, description: &str, operation: Operation) -> NodeType {
    let schema = Schema::builder(GROUP, name)
        .description(description)
        .input_with_default("x", ValueType::Number, 0)
        .computed("value", ValueType::Number)
        .build();
    NodeType::new(schema, move || Box::new(FunctionNode::new(UNARY, operation)))
}

pub fn node_types() -> Vec<NodeType> {
    let pow_schema = Schema::builder(GROUP, "Pow")
        .description("Raises base to exponent")
        .input_with_default("base", ValueType::Number, 0)
        .input_with_default("exponent", ValueType::Number, 2)
        .computed("value", ValueType::Number)
        .build();
    let equal_schema = Schema::builder(GROUP, "Equal")
        .description("Whether a equals b")
        .input("a", ValueType::Any)
        .input("b", ValueType::Any)
        .computed("value", ValueType::Bool)
        .build();

    vec![
        binary("Add", "Adds a and b", ValueType::Number, add),
        binary("Subtract", "Subtracts b from a", ValueType::Number, subtract),
        binary("Multiply", "Multiplies a by b", ValueType::Number, multiply),
        binary("Divide", "Divides a by b", ValueType::Number, divide),
        NodeType::new(pow_schema, || Box::new(FunctionNode::new(POW, pow))),
        unary("Sqrt", "Square root of x", sqrt),
        unary("Negate", "Negates x", negate),
        binary("Greater", "Whether a is greater than b", ValueType::Bool, greater),
        binary("Less", "Whether a is less than b", ValueType::Bool, less),
        NodeType::new(equal_schema, || Box::new(FunctionNode::new(BINARY, equal))),
    ]
}
