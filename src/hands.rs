use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::agent::Driver;
use crate::dom::{self, Perception};
use crate::tools::{self, ToolAction};
use crate::types::{AgentError, BBox};

/// Persistent browser session. Created once at process start; the tab
/// handle is owned here and never reassigned for the lifetime of a run.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
    start_url: String,
    orders_path: PathBuf,
}

impl BrowserSession {
    /// Launch Chrome and land on the start page. Blocking; call from
    /// `spawn_blocking`.
    pub fn launch(headless: bool, start_url: &str, orders_path: PathBuf) -> Result<Self> {
        let options = LaunchOptions {
            headless,
            // A human hand-off can hold the loop for a long time; do not
            // let the browser connection idle out underneath it.
            idle_browser_timeout: Duration::from_secs(86_400),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
            ],
            ..Default::default()
        };

        eprintln!("[Hands] Starting Chrome...");
        let browser = Browser::new(options).context("launching Chrome")?;

        let tab = browser.new_tab()?;
        tab.navigate_to(start_url)?;
        tab.wait_until_navigated()?;
        eprintln!("[Hands] Chrome ready.");

        Ok(Self {
            _browser: browser,
            tab,
            start_url: start_url.to_string(),
            orders_path,
        })
    }
}

#[async_trait]
impl Driver for BrowserSession {
    async fn perceive(&mut self) -> Result<Perception, AgentError> {
        let tab = self.tab.clone();
        let perception = tokio::task::spawn_blocking(move || dom::perceive(&tab))
            .await
            .map_err(|e| anyhow!("perception task panicked: {e}"))??;
        Ok(perception)
    }

    async fn execute(
        &mut self,
        action: ToolAction,
        bboxes: &[BBox],
    ) -> Result<String, AgentError> {
        let tab = self.tab.clone();
        let bboxes = bboxes.to_vec();
        let start_url = self.start_url.clone();
        let orders_path = self.orders_path.clone();
        tokio::task::spawn_blocking(move || {
            tools::execute(&action, &bboxes, &tab, &start_url, &orders_path)
        })
        .await
        .map_err(|e| AgentError::Fatal(anyhow!("tool task panicked: {e}")))?
    }
}
