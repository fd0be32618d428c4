use anyhow::Result;
use async_trait::async_trait;

use crate::brain::Policy;
use crate::dom::Perception;
use crate::tools::ToolAction;
use crate::types::{AgentError, AgentState, BBox, ChatMessage, Decision};

/// Step budget used when the caller does not supply one.
pub const DEFAULT_MAX_STEPS: usize = 10;

const NO_TOOL_NOTE: &str =
    "No tool was called in your last action. Please recheck your last action.";
const MALFORMED_NOTE: &str =
    "Seems like my last response did not have any tool calls or content. I need to check my response";

/// Browser-side half of the loop: perception and tool execution. The live
/// implementation is `hands::BrowserSession`; tests substitute a scripted
/// driver.
#[async_trait]
pub trait Driver {
    async fn perceive(&mut self) -> Result<Perception, AgentError>;
    async fn execute(&mut self, action: ToolAction, bboxes: &[BBox])
    -> Result<String, AgentError>;
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The policy signalled completion with a final answer.
    Completed { answer: String, steps: usize },
    /// A local fault (out-of-range index, unknown tool, bad arguments)
    /// ended the run cleanly.
    Fault { message: String, steps: usize },
    /// The step budget ran out before the policy signalled completion.
    BudgetExhausted { steps: usize },
}

/// Append exactly one history entry for the cycle: the tool's textual
/// result when a tool ran, otherwise a corrective note that nothing was
/// invoked.
pub fn update_history(state: &mut AgentState, tool_output: Option<String>) {
    let entry = match tool_output {
        Some(output) => ChatMessage::system(output),
        None => ChatMessage::user(NO_TOOL_NOTE),
    };
    state.history.push(entry);
}

/// Drive perception → decision → dispatch → history-update cycles until
/// the policy signals completion or the step budget runs out.
///
/// `state` must be freshly seeded with the task text and empty history.
/// Perception exhaustion and transport failures propagate as fatal; index
/// and routing faults end the run cleanly with a `RunOutcome::Fault`.
pub async fn run_task<P, D>(
    policy: &P,
    driver: &mut D,
    state: &mut AgentState,
    max_steps: Option<usize>,
) -> Result<RunOutcome>
where
    P: Policy + ?Sized,
    D: Driver + ?Sized,
{
    let budget = max_steps.unwrap_or(DEFAULT_MAX_STEPS);

    for step in 1..=budget {
        let perception = driver.perceive().await?;
        state.screenshot = perception.screenshot;
        state.bboxes = perception.bboxes;

        eprintln!(
            "[Agent] Step {step}/{budget}: {} elements on page, asking policy...",
            state.bboxes.len()
        );

        let decision = match policy.decide(state).await {
            Ok(decision) => decision,
            Err(e) if e.is_local() => {
                eprintln!("[Agent] Run ended on a local fault: {e}");
                return Ok(RunOutcome::Fault {
                    message: e.to_string(),
                    steps: step,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let Some(decision) = decision else {
            // Sole self-healing path: the reply had neither a tool call
            // nor text. Nudge the policy and go around again.
            eprintln!("[Agent] Malformed policy output; injecting a corrective note.");
            state.history.push(ChatMessage::assistant(MALFORMED_NOTE));
            continue;
        };

        match decision {
            Decision::Complete { answer } => {
                eprintln!("[Agent] Task complete: {answer}");
                return Ok(RunOutcome::Completed {
                    answer,
                    steps: step,
                });
            }
            Decision::Remark(text) => {
                eprintln!("[Agent] Policy remark (no tool): {text}");
                update_history(state, None);
            }
            Decision::Invoke(call) => {
                eprintln!("[Agent] Tool call: {} {}", call.name, call.args);
                let action = match ToolAction::parse(&call) {
                    Ok(action) => action,
                    Err(e) => {
                        eprintln!("[Agent] Routing fault: {e}");
                        return Ok(RunOutcome::Fault {
                            message: e.to_string(),
                            steps: step,
                        });
                    }
                };
                if let Some(outcome) = dispatch(driver, state, action, step).await? {
                    return Ok(outcome);
                }
            }
            Decision::ExtractOrders(orders) => {
                eprintln!("[Agent] Structured extraction: {} order(s)", orders.len());
                let action = ToolAction::SaveOrders(orders);
                if let Some(outcome) = dispatch(driver, state, action, step).await? {
                    return Ok(outcome);
                }
            }
        }
    }

    eprintln!("[Agent] Step budget ({budget}) exhausted before completion.");
    Ok(RunOutcome::BudgetExhausted { steps: budget })
}

/// Execute one action and fold its result into the run state. Returns a
/// terminal outcome for local faults, `None` when the loop continues.
async fn dispatch<D>(
    driver: &mut D,
    state: &mut AgentState,
    action: ToolAction,
    step: usize,
) -> Result<Option<RunOutcome>>
where
    D: Driver + ?Sized,
{
    match driver.execute(action, &state.bboxes).await {
        Ok(output) => {
            eprintln!("[Agent] Tool result: {output}");
            state.last_output = output.clone();
            update_history(state, Some(output));
            Ok(None)
        }
        Err(e) if e.is_local() => {
            eprintln!("[Agent] Run ended on a local fault: {e}");
            Ok(Some(RunOutcome::Fault {
                message: e.to_string(),
                steps: step,
            }))
        }
        Err(e) => Err(e.into()),
    }
}
