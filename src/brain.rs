use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::types::{AgentError, AgentState, BBox, Decision, Order, ToolCall};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 4096;

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent working on a shopping website. Each turn you receive a screenshot with numbered boxes drawn over the interactive elements, plus a text list describing each box. You control the browser by replying with ONE JSON object per turn.

Available tools:
- {"tool":"click","args":{"bbox_id":3}}
- {"tool":"type_text","args":{"bbox_id":3,"text":"wireless headphones"}}
- {"tool":"scroll","args":{"target":"WINDOW","direction":"down"}} (target is "WINDOW" or a bbox id; direction is "up" or "down")
- {"tool":"wait","args":{}}
- {"tool":"go_back","args":{}}
- {"tool":"to_start_page","args":{}}
- {"tool":"hand_off","args":{"query":"Can you please log in to the website?"}}
- {"tool":"save_orders","args":{"orders":[{"product_name":"...","product_price":499,"delivery_status":1}]}}
- {"tool":"complete_task","args":{"answer":"..."}}

Rules:
1. Reply with ONLY a single JSON object. No markdown, no explanation.
2. bbox ids are only valid for the current screenshot. Never reuse an id from an earlier turn.
3. delivery_status codes: 0 = pending, 1 = delivered, 2 = refunded, 3 = cancelled.
4. For login walls, CAPTCHAs, or anything you cannot resolve yourself, use hand_off.
5. When extracting orders, call save_orders before complete_task.
6. When the task is done, call complete_task with the final answer ("COMPLETED" for pure navigation tasks)."#;

/// Abstraction over the LLM policy so the loop can run against a
/// substitute in tests.
#[async_trait]
pub trait Policy {
    /// Ask the policy for the next decision given the current run state.
    ///
    /// `Ok(None)` means the raw response carried neither a tool call nor
    /// non-empty text; the loop answers that with a corrective history
    /// entry instead of failing the run.
    async fn decide(&self, state: &AgentState) -> Result<Option<Decision>, AgentError>;
}

/// The live policy client: immutable configuration built once at process
/// start and threaded through the loop.
pub struct Brain {
    client: Client,
    api_key: String,
    model: String,
}

impl Brain {
    pub fn new(model: &str) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set in environment"))?;
        Ok(Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Fixed system instructions, the task, the running history, then the
    /// current screenshot (as a data URL) with the element descriptions.
    fn build_messages(&self, state: &AgentState) -> Vec<serde_json::Value> {
        let mut messages = vec![
            json!({"role": "system", "content": SYSTEM_PROMPT}),
            json!({"role": "user", "content": state.task}),
        ];
        for message in &state.history {
            messages.push(json!({"role": message.role, "content": message.content}));
        }
        messages.push(json!({
            "role": "user",
            "content": [
                {
                    "type": "image_url",
                    "image_url": {"url": format!("data:image/png;base64,{}", state.screenshot)},
                },
                {"type": "text", "text": format_descriptions(&state.bboxes)},
            ],
        }));
        messages
    }
}

#[async_trait]
impl Policy for Brain {
    async fn decide(&self, state: &AgentState) -> Result<Option<Decision>, AgentError> {
        let response = self
            .client
            .post(OPENAI_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": self.build_messages(state),
                "temperature": 0.2,
                "max_tokens": MAX_TOKENS,
            }))
            .send()
            .await
            .context("sending chat completion request")?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .context("reading chat completion response")?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            return Err(anyhow!("OpenAI API error ({status}): {message}").into());
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        eprintln!("[Brain] LLM says: {content}");

        parse_decision(content)
    }
}

/// Render the bbox list the way the policy sees it: aria-label when
/// present, visible text otherwise.
pub fn format_descriptions(bboxes: &[BBox]) -> String {
    let mut lines = vec!["Valid Bounding Boxes:".to_string()];
    for (i, bbox) in bboxes.iter().enumerate() {
        let text = if bbox.aria_label.trim().is_empty() {
            &bbox.text
        } else {
            &bbox.aria_label
        };
        lines.push(format!("{i} (<{}/>): \"{text}\"", bbox.kind));
    }
    lines.join("\n")
}

/// Interpret the raw model reply as a decision outcome.
///
/// `Ok(None)` marks a malformed reply (no tool call, no text). Tool
/// arguments are parsed strictly against their schema; they are data,
/// never evaluated.
pub fn parse_decision(raw: &str) -> Result<Option<Decision>, AgentError> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if cleaned.is_empty() {
        return Ok(None);
    }

    let call: ToolCall = match serde_json::from_str(cleaned) {
        Ok(call) => call,
        Err(_) => return Ok(Some(Decision::Remark(cleaned.to_string()))),
    };

    fn args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, AgentError> {
        serde_json::from_value(call.args.clone()).map_err(|e| AgentError::BadArgs {
            tool: call.name.clone(),
            reason: e.to_string(),
        })
    }

    match call.name.as_str() {
        "complete_task" => {
            #[derive(serde::Deserialize)]
            struct CompleteArgs {
                answer: String,
            }
            let parsed: CompleteArgs = args(&call)?;
            Ok(Some(Decision::Complete {
                answer: parsed.answer,
            }))
        }
        "save_orders" => {
            #[derive(serde::Deserialize)]
            struct OrdersArgs {
                orders: Vec<Order>,
            }
            let parsed: OrdersArgs = args(&call)?;
            Ok(Some(Decision::ExtractOrders(parsed.orders)))
        }
        _ => Ok(Some(Decision::Invoke(call))),
    }
}
