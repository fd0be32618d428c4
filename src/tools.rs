use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use headless_chrome::Tab;
use headless_chrome::browser::tab::ModifierKey;
use headless_chrome::browser::tab::point::Point;
use serde::Deserialize;

use crate::types::{AgentError, BBox, Order, ScrollDirection, ScrollTarget, ToolCall};

const VIEWPORT_SCROLL_PX: i64 = 600;
const ELEMENT_SCROLL_PX: i64 = 200;
const WAIT_DELAY: Duration = Duration::from_secs(5);

/// A fully validated tool invocation, ready to execute.
///
/// `ToolAction::parse` is the dispatch table: it maps the decided tool
/// name to exactly one action and strictly validates the argument record
/// against the expected shape, before any browser traffic is issued.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    Click { bbox_id: usize },
    TypeText { bbox_id: usize, text: String },
    Scroll { target: ScrollTarget, direction: ScrollDirection },
    Wait,
    GoBack,
    ToStartPage,
    HandOff { query: String },
    SaveOrders(Vec<Order>),
}

#[derive(Deserialize)]
struct ClickArgs {
    bbox_id: usize,
}

#[derive(Deserialize)]
struct TypeTextArgs {
    bbox_id: usize,
    text: String,
}

#[derive(Deserialize)]
struct ScrollArgs {
    target: ScrollTarget,
    direction: ScrollDirection,
}

#[derive(Deserialize)]
struct HandOffArgs {
    query: String,
}

impl ToolAction {
    pub fn parse(call: &ToolCall) -> Result<Self, AgentError> {
        fn args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, AgentError> {
            serde_json::from_value(call.args.clone()).map_err(|e| AgentError::BadArgs {
                tool: call.name.clone(),
                reason: e.to_string(),
            })
        }

        match call.name.as_str() {
            "click" => {
                let a: ClickArgs = args(call)?;
                Ok(ToolAction::Click { bbox_id: a.bbox_id })
            }
            "type_text" => {
                let a: TypeTextArgs = args(call)?;
                Ok(ToolAction::TypeText {
                    bbox_id: a.bbox_id,
                    text: a.text,
                })
            }
            "scroll" => {
                let a: ScrollArgs = args(call)?;
                Ok(ToolAction::Scroll {
                    target: a.target,
                    direction: a.direction,
                })
            }
            "wait" => Ok(ToolAction::Wait),
            "go_back" => Ok(ToolAction::GoBack),
            "to_start_page" => Ok(ToolAction::ToStartPage),
            "hand_off" => {
                let a: HandOffArgs = args(call)?;
                Ok(ToolAction::HandOff { query: a.query })
            }
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }
}

/// Resolve a bounding-box index into page coordinates.
///
/// This is the out-of-range gate for every element-addressed tool: it
/// fails before any pointer or keyboard traffic reaches the page.
pub fn resolve_bbox(index: usize, bboxes: &[BBox]) -> Result<(f64, f64), AgentError> {
    match bboxes.get(index) {
        Some(bbox) => Ok((bbox.x, bbox.y)),
        None => Err(AgentError::IndexOutOfRange {
            index,
            len: bboxes.len(),
        }),
    }
}

pub fn click(bbox_id: usize, bboxes: &[BBox], tab: &Arc<Tab>) -> Result<String, AgentError> {
    let (x, y) = resolve_bbox(bbox_id, bboxes)?;
    tab.click_point(Point { x, y })?;
    Ok(format!("Clicked {bbox_id}"))
}

/// Click the target, clear whatever it holds, type the replacement and
/// submit with Enter.
pub fn type_text(
    bbox_id: usize,
    text: &str,
    bboxes: &[BBox],
    tab: &Arc<Tab>,
) -> Result<String, AgentError> {
    let (x, y) = resolve_bbox(bbox_id, bboxes)?;
    tab.click_point(Point { x, y })?;
    let select_all = if cfg!(target_os = "macos") {
        ModifierKey::Meta
    } else {
        ModifierKey::Ctrl
    };
    tab.press_key_with_modifiers("a", Some(&[select_all]))?;
    tab.press_key("Backspace")?;
    tab.type_str(text)?;
    tab.press_key("Enter")?;
    Ok(format!("Typed {text} and submitted"))
}

pub fn scroll(
    target: ScrollTarget,
    direction: ScrollDirection,
    bboxes: &[BBox],
    tab: &Arc<Tab>,
) -> Result<String, AgentError> {
    match target {
        ScrollTarget::Viewport => {
            let delta = direction.signed(VIEWPORT_SCROLL_PX);
            tab.evaluate(&format!("window.scrollBy(0, {delta})"), false)?;
            Ok(format!("Scrolled {direction} in WINDOW"))
        }
        ScrollTarget::Element(index) => {
            let (x, y) = resolve_bbox(index, bboxes)?;
            let delta = direction.signed(ELEMENT_SCROLL_PX);
            tab.evaluate(
                &format!(
                    "(() => {{ const el = document.elementFromPoint({x}, {y}); if (el) el.scrollBy(0, {delta}); }})()"
                ),
                false,
            )?;
            Ok(format!("Scrolled {direction} in element {index}"))
        }
    }
}

/// Coarse backoff for slow-loading content.
pub fn wait() -> String {
    std::thread::sleep(WAIT_DELAY);
    format!("Waited for {}s.", WAIT_DELAY.as_secs())
}

pub fn go_back(tab: &Arc<Tab>) -> Result<String, AgentError> {
    tab.evaluate("history.back()", false)?;
    std::thread::sleep(Duration::from_millis(1000));
    let url = crate::dom::current_url(tab)?;
    Ok(format!("Navigated back a page to {url}."))
}

pub fn to_start_page(tab: &Arc<Tab>, url: &str) -> Result<String, AgentError> {
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    Ok(format!("Navigated to {url}."))
}

/// Suspend automated control and ask the human operator. Blocks the whole
/// loop on the terminal until a reply arrives; there is deliberately no
/// timeout here, so an unattended run parks on this prompt.
pub fn hand_off(query: &str) -> Result<String, AgentError> {
    let mut stdout = io::stdout();
    write!(stdout, "{query}\n> ").map_err(anyhow::Error::from)?;
    stdout.flush().map_err(anyhow::Error::from)?;

    let mut reply = String::new();
    io::stdin()
        .read_line(&mut reply)
        .map_err(anyhow::Error::from)?;
    Ok(format!("AI: {query}\nUser: {}", reply.trim()))
}

/// Persist the extracted orders as the run's durable artifact. Each call
/// replaces the previous artifact wholly; there is no merging.
pub fn save_orders(orders: &[Order], path: &Path) -> Result<String, AgentError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("opening orders artifact {}", path.display()))?;
    serde_json::to_writer_pretty(file, orders).context("writing orders artifact")?;
    Ok("Orders saved successfully".to_string())
}

/// Execute a validated action against the live tab. Blocking; run inside
/// `spawn_blocking`.
pub fn execute(
    action: &ToolAction,
    bboxes: &[BBox],
    tab: &Arc<Tab>,
    start_url: &str,
    orders_path: &Path,
) -> Result<String, AgentError> {
    match action {
        ToolAction::Click { bbox_id } => click(*bbox_id, bboxes, tab),
        ToolAction::TypeText { bbox_id, text } => type_text(*bbox_id, text, bboxes, tab),
        ToolAction::Scroll { target, direction } => scroll(*target, *direction, bboxes, tab),
        ToolAction::Wait => Ok(wait()),
        ToolAction::GoBack => go_back(tab),
        ToolAction::ToStartPage => to_start_page(tab, start_url),
        ToolAction::HandOff { query } => hand_off(query),
        ToolAction::SaveOrders(orders) => save_orders(orders, orders_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeliveryStatus;
    use serde_json::json;

    fn bboxes(n: usize) -> Vec<BBox> {
        (0..n)
            .map(|i| BBox {
                x: 100.0 + i as f64,
                y: 200.0 + i as f64,
                text: format!("element {i}"),
                aria_label: String::new(),
                kind: "a".to_string(),
            })
            .collect()
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn parse_routes_every_known_tool() {
        let parsed = ToolAction::parse(&call("click", json!({"bbox_id": 2}))).unwrap();
        assert_eq!(parsed, ToolAction::Click { bbox_id: 2 });

        let parsed =
            ToolAction::parse(&call("type_text", json!({"bbox_id": 0, "text": "socks"}))).unwrap();
        assert_eq!(
            parsed,
            ToolAction::TypeText {
                bbox_id: 0,
                text: "socks".to_string()
            }
        );

        let parsed = ToolAction::parse(&call(
            "scroll",
            json!({"target": "WINDOW", "direction": "down"}),
        ))
        .unwrap();
        assert_eq!(
            parsed,
            ToolAction::Scroll {
                target: ScrollTarget::Viewport,
                direction: ScrollDirection::Down
            }
        );

        let parsed =
            ToolAction::parse(&call("scroll", json!({"target": 3, "direction": "up"}))).unwrap();
        assert_eq!(
            parsed,
            ToolAction::Scroll {
                target: ScrollTarget::Element(3),
                direction: ScrollDirection::Up
            }
        );

        assert_eq!(
            ToolAction::parse(&call("wait", json!({}))).unwrap(),
            ToolAction::Wait
        );
        assert_eq!(
            ToolAction::parse(&call("go_back", json!(null))).unwrap(),
            ToolAction::GoBack
        );
        assert_eq!(
            ToolAction::parse(&call("to_start_page", json!({}))).unwrap(),
            ToolAction::ToStartPage
        );

        let parsed =
            ToolAction::parse(&call("hand_off", json!({"query": "Please log in"}))).unwrap();
        assert_eq!(
            parsed,
            ToolAction::HandOff {
                query: "Please log in".to_string()
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_tool_names() {
        let err = ToolAction::parse(&call("frobnicate", json!({}))).unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(ref name) if name == "frobnicate"));
        assert!(err.is_local());
    }

    #[test]
    fn parse_rejects_malformed_argument_records() {
        // Wrong type for bbox_id.
        let err = ToolAction::parse(&call("click", json!({"bbox_id": "three"}))).unwrap_err();
        assert!(matches!(err, AgentError::BadArgs { ref tool, .. } if tool == "click"));

        // Missing required field.
        let err = ToolAction::parse(&call("type_text", json!({"bbox_id": 1}))).unwrap_err();
        assert!(matches!(err, AgentError::BadArgs { .. }));

        // Junk scroll target.
        let err = ToolAction::parse(&call(
            "scroll",
            json!({"target": "PAGE", "direction": "down"}),
        ))
        .unwrap_err();
        assert!(matches!(err, AgentError::BadArgs { .. }));
    }

    #[test]
    fn resolve_bbox_rejects_out_of_range_indices() {
        let list = bboxes(3);
        assert_eq!(resolve_bbox(1, &list).unwrap(), (101.0, 201.0));

        let err = resolve_bbox(3, &list).unwrap_err();
        assert!(matches!(err, AgentError::IndexOutOfRange { index: 3, len: 3 }));
        assert!(err.is_local());

        let err = resolve_bbox(7, &[]).unwrap_err();
        assert!(matches!(err, AgentError::IndexOutOfRange { index: 7, len: 0 }));
    }

    #[test]
    fn save_orders_overwrites_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");

        let first = vec![Order {
            product_name: "placeholder".to_string(),
            product_price: 1,
            delivery_status: DeliveryStatus::Pending,
        }];
        save_orders(&first, &path).unwrap();

        let orders = vec![
            Order {
                product_name: "Bluetooth speaker".to_string(),
                product_price: 1999,
                delivery_status: DeliveryStatus::Delivered,
            },
            Order {
                product_name: "Phone case".to_string(),
                product_price: 349,
                delivery_status: DeliveryStatus::Refunded,
            },
            Order {
                product_name: "HDMI cable".to_string(),
                product_price: 599,
                delivery_status: DeliveryStatus::Cancelled,
            },
        ];
        let output = save_orders(&orders, &path).unwrap();
        assert_eq!(output, "Orders saved successfully");

        // Full overwrite: only the second list survives, in order.
        let raw = std::fs::read_to_string(&path).unwrap();
        let back: Vec<Order> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, orders);

        let codes: Vec<u64> = serde_json::from_str::<serde_json::Value>(&raw)
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["delivery_status"].as_u64().unwrap())
            .collect();
        assert!(codes.iter().all(|c| *c <= 3));
    }
}
