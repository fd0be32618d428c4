use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;

use crate::types::BBox;

const EXTRACT_ATTEMPTS: usize = 10;
const EXTRACT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What one perception cycle produces: a screenshot taken while the
/// numbered overlays are visible, and the ordered element-descriptor list.
#[derive(Debug, Clone, Default)]
pub struct Perception {
    /// Base64-encoded PNG.
    pub screenshot: String,
    pub bboxes: Vec<BBox>,
}

/// JavaScript injected into the page to tag interactive elements.
///
/// `markPage()` draws a numbered outline over every visible interactive
/// element in the viewport and returns the descriptor list as a JSON
/// string; `unmarkPage()` removes every overlay again.
const MARK_PAGE_JS: &str = r#"
(() => {
  const OVERLAY_CLASS = 'agent-bbox-overlay';

  window.unmarkPage = () => {
    document.querySelectorAll('.' + OVERLAY_CLASS).forEach(n => n.remove());
  };

  window.markPage = () => {
    window.unmarkPage();
    const selector = 'a, button, input, textarea, select, [role="button"], [onclick]';
    const items = [];
    for (const el of document.querySelectorAll(selector)) {
      const r = el.getBoundingClientRect();
      if (r.width < 2 || r.height < 2) continue;
      if (r.bottom < 0 || r.right < 0 || r.top > window.innerHeight || r.left > window.innerWidth) continue;
      const s = getComputedStyle(el);
      if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') continue;

      const idx = items.length;
      items.push({
        x: r.left + r.width / 2,
        y: r.top + r.height / 2,
        text: (el.innerText || el.value || '').trim().slice(0, 80),
        type: el.tagName.toLowerCase(),
        ariaLabel: el.getAttribute('aria-label') || '',
      });

      const box = document.createElement('div');
      box.className = OVERLAY_CLASS;
      box.style.cssText = 'position:fixed;z-index:2147483647;pointer-events:none;border:2px solid #e11;' +
        'left:' + r.left + 'px;top:' + r.top + 'px;width:' + r.width + 'px;height:' + r.height + 'px;';
      const tag = document.createElement('span');
      tag.textContent = String(idx);
      tag.style.cssText = 'position:absolute;top:-18px;left:0;background:#e11;color:#fff;' +
        'font:12px monospace;padding:0 3px;';
      box.appendChild(tag);
      document.body.appendChild(box);
    }
    return JSON.stringify(items);
  };
})()
"#;

/// Run one perception cycle against the live tab. Blocking; call from
/// `spawn_blocking`.
///
/// The overlays are removed on every exit path, including extraction
/// exhaustion, so a failed cycle cannot corrupt later renders.
pub fn perceive(tab: &Arc<Tab>) -> Result<Perception> {
    tab.evaluate(MARK_PAGE_JS, false)
        .context("injecting page marker script")?;

    let result = mark_and_capture(tab);
    let _ = tab.evaluate("window.unmarkPage && window.unmarkPage()", false);
    result
}

fn mark_and_capture(tab: &Arc<Tab>) -> Result<Perception> {
    let bboxes = extract_bboxes(tab)?;
    let png = tab
        .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        .context("capturing page screenshot")?;
    Ok(Perception {
        screenshot: base64::engine::general_purpose::STANDARD.encode(png),
        bboxes,
    })
}

/// Page-load races make the first extraction attempts flaky; retry with a
/// real delay before giving up for good.
fn extract_bboxes(tab: &Arc<Tab>) -> Result<Vec<BBox>> {
    let mut last_err = None;
    for attempt in 1..=EXTRACT_ATTEMPTS {
        match try_extract(tab) {
            Ok(bboxes) => return Ok(bboxes),
            Err(e) => {
                eprintln!(
                    "[Dom] Element extraction attempt {attempt}/{EXTRACT_ATTEMPTS} failed: {e:#}"
                );
                last_err = Some(e);
                if attempt < EXTRACT_ATTEMPTS {
                    std::thread::sleep(EXTRACT_RETRY_DELAY);
                }
            }
        }
    }
    let err = last_err.unwrap_or_else(|| anyhow!("element extraction produced no result"));
    Err(err.context("element extraction exhausted all retries"))
}

fn try_extract(tab: &Arc<Tab>) -> Result<Vec<BBox>> {
    let result = tab.evaluate("markPage()", false)?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| anyhow!("markPage() returned no value"))?;
    let bboxes: Vec<BBox> = serde_json::from_str(&raw).context("parsing element descriptors")?;
    Ok(bboxes)
}

/// Get the current page URL.
pub fn current_url(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("window.location.href", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string()))
}
