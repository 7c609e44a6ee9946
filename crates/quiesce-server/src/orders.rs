//! Demo order-processing agent: DTOs, tools, and a deterministic planner.

use async_trait::async_trait;
use quiesce_agent::{
    Agent, AgentBuildError, AgentHook, Message, Planner, PlannerError, PlannerOutput, Role, Tool,
    ToolCall, ToolDescriptor, ToolError, ToolResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// The fixed processing sequence the agent walks through.
pub const ORDER_PIPELINE: [&str; 4] = [
    "validate_order",
    "check_inventory",
    "process_payment",
    "send_notification",
];

const ORDER_SYSTEM_PROMPT: &str = "\
You are an order processing assistant. Process customer orders by:
1. validating the order with the validate_order tool
2. checking inventory for the products with the check_inventory tool
3. capturing the payment with the process_payment tool
4. sending a confirmation with the send_notification tool

Always process orders in this exact sequence. If any step fails, stop and
report the error.";

/// Incoming order request. `sessionId` is optional: absent means a new
/// session, present means the caller wants to resume or extend one.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub order_id: String,
    #[serde(default)]
    pub products: Vec<ProductLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductLine {
    pub id: String,
    pub quantity: u32,
}

/// Initial user message for a fresh order.
pub fn order_prompt(request: &OrderRequest) -> String {
    let products = request
        .products
        .iter()
        .map(|p| format!("{} x{}", p.id, p.quantity))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Please process this order. Order ID: {}. Products: {}.",
        request.order_id,
        if products.is_empty() { "none".to_string() } else { products }
    )
}

/// Build the order agent wired with the given hook (typically the shutdown
/// guard) and per-tool latency.
pub fn build_order_agent(
    request: &OrderRequest,
    hook: Arc<dyn AgentHook>,
    tool_latency: Duration,
) -> Result<Arc<Agent>, AgentBuildError> {
    Agent::builder("order-processor")
        .system_prompt(ORDER_SYSTEM_PROMPT)
        .planner(Arc::new(OrderPlanner {
            order_id: request.order_id.clone(),
            products: request.products.clone(),
        }))
        .tools(order_tools(tool_latency))
        .hook(hook)
        .max_steps(10)
        .build()
}

struct OrderStepTool {
    descriptor: ToolDescriptor,
    latency: Duration,
    outcome: fn(&Value) -> Value,
}

#[async_trait]
impl Tool for OrderStepTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(ToolResult::success(
            &self.descriptor.name,
            (self.outcome)(&args),
        ))
    }
}

fn order_id_of(args: &Value) -> Value {
    args.get("orderId").cloned().unwrap_or(Value::Null)
}

/// The four order tools, each simulating a slow backend call.
pub fn order_tools(latency: Duration) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(OrderStepTool {
            descriptor: ToolDescriptor::new(
                "validate_order",
                "Validate Order",
                "Validate order id and product list",
            ),
            latency,
            outcome: |args| json!({ "orderId": order_id_of(args), "valid": true }),
        }),
        Arc::new(OrderStepTool {
            descriptor: ToolDescriptor::new(
                "check_inventory",
                "Check Inventory",
                "Check stock for every product in the order",
            ),
            latency,
            outcome: |args| {
                json!({ "orderId": order_id_of(args), "available": true })
            },
        }),
        Arc::new(OrderStepTool {
            descriptor: ToolDescriptor::new(
                "process_payment",
                "Process Payment",
                "Capture the payment for the order",
            ),
            latency,
            outcome: |args| {
                json!({
                    "orderId": order_id_of(args),
                    "transactionId": format!("txn-{}", uuid::Uuid::new_v4().simple()),
                    "captured": true,
                })
            },
        }),
        Arc::new(OrderStepTool {
            descriptor: ToolDescriptor::new(
                "send_notification",
                "Send Notification",
                "Send the order confirmation to the customer",
            ),
            latency,
            outcome: |args| json!({ "orderId": order_id_of(args), "sent": true }),
        }),
    ]
}

/// Names of tools that already have a response in the conversation.
fn completed_tools(messages: &[Message]) -> HashSet<String> {
    let mut id_to_name = HashMap::new();
    for message in messages {
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                id_to_name.insert(call.id.clone(), call.name.clone());
            }
        }
    }
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .filter_map(|id| id_to_name.get(id).cloned())
        .collect()
}

/// Deterministic planner walking [`ORDER_PIPELINE`] one tool per step.
///
/// The next step is derived from the conversation: a tool counts as done
/// once its response message is present, so after a resume the pipeline
/// picks up exactly where the previous execution stopped. A call that was
/// aborted before its response landed is issued again (at-least-once).
pub struct OrderPlanner {
    order_id: String,
    products: Vec<ProductLine>,
}

impl OrderPlanner {
    fn arguments_for(&self, tool: &str) -> Value {
        match tool {
            "check_inventory" => json!({
                "orderId": self.order_id,
                "products": self.products,
            }),
            _ => json!({ "orderId": self.order_id }),
        }
    }
}

#[async_trait]
impl Planner for OrderPlanner {
    async fn plan(&self, messages: &[Message]) -> Result<PlannerOutput, PlannerError> {
        let done = completed_tools(messages);
        match ORDER_PIPELINE.iter().find(|name| !done.contains(**name)) {
            Some(name) => Ok(PlannerOutput {
                text: format!("Running {name} for order {}.", self.order_id),
                tool_calls: vec![ToolCall::new(
                    format!("call_{}_{}", name, messages.len()),
                    *name,
                    self.arguments_for(name),
                )],
            }),
            None => Ok(PlannerOutput {
                text: format!(
                    "Order {} processed successfully: payment captured and confirmation sent.",
                    self.order_id
                ),
                tool_calls: vec![],
            }),
        }
    }
}
