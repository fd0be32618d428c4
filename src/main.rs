use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dotenvy::dotenv;

use shop_agent::agent::{self, RunOutcome};
use shop_agent::brain::Brain;
use shop_agent::hands::BrowserSession;
use shop_agent::types::AgentState;

/// LLM-driven browser agent for shopping-site tasks.
#[derive(Parser, Debug)]
#[command(name = "shop-agent", version, about)]
struct Cli {
    /// File holding the plain-text task instruction.
    #[arg(long, default_value = "task.txt")]
    task_file: PathBuf,

    /// Page the browser opens on (and the to_start_page tool returns to).
    #[arg(long, default_value = "https://www.google.com/")]
    start_url: String,

    /// Maximum number of decide/act cycles before the run is cut off.
    #[arg(long, default_value_t = 100)]
    max_steps: usize,

    /// Where the structured-extraction tool writes the orders artifact.
    #[arg(long, default_value = "orders.json")]
    orders_file: PathBuf,

    /// Chat model the policy runs on.
    #[arg(long, default_value = "gpt-4o")]
    model: String,

    /// Run Chrome without a visible window.
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let task = std::fs::read_to_string(&cli.task_file)
        .with_context(|| format!("reading task file {}", cli.task_file.display()))?;

    let brain = Brain::new(&cli.model)?;

    eprintln!("[Agent] Launching browser...");
    let headless = cli.headless;
    let start_url = cli.start_url.clone();
    let orders_file = cli.orders_file.clone();
    let mut session = tokio::task::spawn_blocking(move || {
        BrowserSession::launch(headless, &start_url, orders_file)
    })
    .await
    .map_err(|e| anyhow::anyhow!("browser launch panicked: {e}"))??;

    eprintln!("[Agent] Running task from {}", cli.task_file.display());
    let mut state = AgentState::new(task.trim());
    match agent::run_task(&brain, &mut session, &mut state, Some(cli.max_steps)).await? {
        RunOutcome::Completed { answer, steps } => {
            eprintln!("[Agent] Finished in {steps} step(s): {answer}");
            Ok(())
        }
        RunOutcome::Fault { message, steps } => {
            eprintln!("[Agent] Run ended after {steps} step(s) on a local fault: {message}");
            Ok(())
        }
        RunOutcome::BudgetExhausted { steps } => {
            bail!("run stopped after exhausting its {steps}-step budget")
        }
    }
}
