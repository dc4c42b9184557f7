use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, RunnerError};
use crate::viewport::{BoundingBox, Resolution};

/// One interactive element, addressable through the handle assigned to it
/// during the gather step that produced this registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickTarget {
    pub handle: u32,
    /// Buying options carry their visible label element here; the label is
    /// what scrolling aims at, while clicks go to the control itself.
    pub label_handle: Option<u32>,
}

/// What a gather step learned about the current page: search-bar presence and
/// the registry of clickables keyed by visible text. Rebuilt fresh every tick
/// and never retained across frames, so it cannot go stale when the page
/// changes underneath it.
#[derive(Debug, Clone, Default)]
pub struct ActionInventory {
    pub has_search_bar: bool,
    clickables: Vec<(String, ClickTarget)>,
}

impl ActionInventory {
    pub fn new(has_search_bar: bool) -> Self {
        Self {
            has_search_bar,
            clickables: Vec::new(),
        }
    }

    /// Register a clickable. A later registration under the same key replaces
    /// the earlier one but keeps its position.
    pub fn insert(&mut self, key: String, target: ClickTarget) {
        if let Some(slot) = self.clickables.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = target;
        } else {
            self.clickables.push((key, target));
        }
    }

    pub fn resolve(&self, key: &str) -> Option<&ClickTarget> {
        self.clickables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| t)
    }

    /// Registered keys in registration order, as offered to the decision
    /// service.
    pub fn keys(&self) -> Vec<String> {
        self.clickables.iter().map(|(k, _)| k.clone()).collect()
    }
}

/// Where a bounding-box query points.
#[derive(Debug, Clone, Copy)]
pub enum Locator {
    SearchInput,
    Element(u32),
}

/// The rendering collaborator as the orchestration core sees it. One handle
/// per session, owned exclusively by that session's driver.
pub trait Storefront {
    fn resolution(&self) -> Resolution;

    /// Full rendered markup of the current frame.
    fn page_html(&mut self) -> Result<String>;

    /// The shopping goal text embedded in the session's start page.
    fn instruction_text(&mut self) -> Result<String>;

    /// Rebuild the clickable registry against the current rendered state.
    fn gather(&mut self) -> Result<ActionInventory>;

    /// Live vertical scroll offset in pixels. Never cached.
    fn scroll_offset(&mut self) -> Result<f64>;

    fn scroll_by(&mut self, amount: f64) -> Result<()>;

    /// Bounding box of the located element, fresh against the current state.
    /// `SearchInput` with no search control on the page is `ElementNotFound`;
    /// a registry handle whose element has vanished resolves to `None`.
    fn bounding_box(&mut self, locator: Locator) -> Result<Option<BoundingBox>>;

    /// Type the query into the search control and trigger submission.
    fn submit_search(&mut self, query: &str) -> Result<()>;

    /// Click a registered element, falling back to a forced script-level
    /// activation when the standard interaction path refuses.
    fn click(&mut self, handle: u32) -> Result<()>;

    /// Reward signal embedded in the rendered state, 0.0 when absent.
    fn reward(&mut self) -> Result<f64>;

    fn capture_frame(&mut self, path: &Path) -> Result<()>;

    fn close(self: Box<Self>);
}

/// Creates one storefront handle per spawned session.
pub trait StorefrontOpener {
    fn open(&self, session: &str, resolution: Resolution) -> Result<Box<dyn Storefront>>;
}

/// Tags every button, product link and buying option with a sequential
/// `data-ws-handle` attribute and reports the registry as JSON. Radio options
/// are registered twice: under their value attribute (carrying the label
/// element's handle, since the label is the scroll target) and under the
/// label's visible text.
const GATHER_JS: &str = r#"
(() => {
  let next = window.__wsNextHandle || 0;
  const tag = (el) => { el.dataset.wsHandle = String(next); return next++; };
  const entries = [];
  for (const el of document.querySelectorAll('.btn')) {
    entries.push({ key: (el.textContent || '').trim(), handle: tag(el), label: null });
  }
  for (const el of document.querySelectorAll('.product-link')) {
    entries.push({ key: (el.textContent || '').trim(), handle: tag(el), label: null });
  }
  for (const opt of document.querySelectorAll("input[type='radio']")) {
    const entry = { key: opt.value || '', handle: tag(opt), label: null };
    const label = document.querySelector("label[for='" + opt.id + "']");
    if (label) {
      entry.label = tag(label);
      entries.push({ key: (label.textContent || '').trim(), handle: entry.label, label: null });
    }
    entries.push(entry);
  }
  window.__wsNextHandle = next;
  return JSON.stringify({
    has_search_bar: document.getElementById('search_input') !== null,
    entries: entries,
  });
})()
"#;

#[derive(Deserialize)]
struct RawInventory {
    has_search_bar: bool,
    entries: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    key: String,
    handle: u32,
    label: Option<u32>,
}

pub struct ChromeOpener {
    pub base_url: String,
}

impl StorefrontOpener for ChromeOpener {
    fn open(&self, session: &str, resolution: Resolution) -> Result<Box<dyn Storefront>> {
        Ok(Box::new(ChromeStorefront::launch(
            &self.base_url,
            session,
            resolution,
        )?))
    }
}

/// Headless Chrome implementation of [`Storefront`]. One browser process per
/// session; the window size fixes the session's viewport for its lifetime.
pub struct ChromeStorefront {
    _browser: Browser,
    tab: Arc<Tab>,
    resolution: Resolution,
}

impl ChromeStorefront {
    pub fn launch(base_url: &str, session: &str, resolution: Resolution) -> Result<Self> {
        let options = LaunchOptions {
            headless: true,
            window_size: Some((resolution.width, resolution.height)),
            args: vec![OsStr::new("--force-device-scale-factor=1")],
            // Sessions sit idle while the rest of the batch acts and while
            // the decision call is in flight.
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        let browser = Browser::new(options)?;
        let tab = browser.new_tab()?;
        let url = format!("{base_url}/{session}");
        debug!(%url, width = resolution.width, height = resolution.height, "opening session page");
        tab.navigate_to(&url)?;
        tab.wait_for_element("body")?;

        Ok(Self {
            _browser: browser,
            tab,
            resolution,
        })
    }

    fn eval_string(&self, js: &str) -> Result<String> {
        let result = self.tab.evaluate(js, false)?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    fn eval_f64(&self, js: &str) -> Result<f64> {
        let result = self.tab.evaluate(js, false)?;
        Ok(result.value.and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    fn box_of_selector(&self, selector: &str) -> Result<Option<BoundingBox>> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector('{selector}');
  if (!el) return 'null';
  const r = el.getBoundingClientRect();
  return JSON.stringify({{
    x: r.x + window.pageXOffset,
    y: r.y + window.pageYOffset,
    width: r.width,
    height: r.height,
  }});
}})()"#
        );
        let raw = self.eval_string(&js)?;
        serde_json::from_str(&raw)
            .map_err(|e| RunnerError::Browser(anyhow::anyhow!("bad bounding box payload: {e}")))
    }
}

impl Storefront for ChromeStorefront {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn page_html(&mut self) -> Result<String> {
        Ok(self.tab.get_content()?)
    }

    fn instruction_text(&mut self) -> Result<String> {
        self.eval_string(
            "(() => { const el = document.querySelector('#instruction-text h4'); \
             return el ? el.textContent.trim() : ''; })()",
        )
    }

    fn gather(&mut self) -> Result<ActionInventory> {
        let raw = self.eval_string(GATHER_JS)?;
        let parsed: RawInventory = serde_json::from_str(&raw)
            .map_err(|e| RunnerError::Browser(anyhow::anyhow!("bad gather payload: {e}")))?;

        let mut inventory = ActionInventory::new(parsed.has_search_bar);
        for entry in parsed.entries {
            inventory.insert(
                entry.key,
                ClickTarget {
                    handle: entry.handle,
                    label_handle: entry.label,
                },
            );
        }
        Ok(inventory)
    }

    fn scroll_offset(&mut self) -> Result<f64> {
        self.eval_f64("window.pageYOffset")
    }

    fn scroll_by(&mut self, amount: f64) -> Result<()> {
        self.tab
            .evaluate(&format!("window.scrollBy(0, {amount});"), false)?;
        Ok(())
    }

    fn bounding_box(&mut self, locator: Locator) -> Result<Option<BoundingBox>> {
        match locator {
            Locator::SearchInput => {
                if self.tab.find_element("#search_input").is_err() {
                    return Err(RunnerError::ElementNotFound("search_input".to_string()));
                }
                self.box_of_selector("#search_input")
            }
            Locator::Element(handle) => {
                self.box_of_selector(&format!("[data-ws-handle=\"{handle}\"]"))
            }
        }
    }

    fn submit_search(&mut self, query: &str) -> Result<()> {
        let input = self
            .tab
            .find_element("#search_input")
            .map_err(|_| RunnerError::ElementNotFound("search_input".to_string()))?;
        input.click()?;
        self.tab
            .evaluate("document.getElementById('search_input').value = ''", false)?;
        self.tab.type_str(query)?;
        self.tab.press_key("Enter")?;
        Ok(())
    }

    fn click(&mut self, handle: u32) -> Result<()> {
        let selector = format!("[data-ws-handle=\"{handle}\"]");
        let element = self
            .tab
            .find_element(&selector)
            .map_err(|_| RunnerError::ElementNotFound(selector.clone()))?;
        if let Err(err) = element.click() {
            // Some controls are visually present but refuse the standard
            // interaction path; activate them at the script level instead.
            debug!(%selector, %err, "standard click refused, forcing script click");
            self.tab.evaluate(
                &format!("document.querySelector('{selector}').click()"),
                false,
            )?;
        }
        Ok(())
    }

    fn reward(&mut self) -> Result<f64> {
        let raw = self.eval_string(
            "(() => { const el = document.querySelector('#reward pre'); \
             return el ? el.textContent.trim() : ''; })()",
        )?;
        Ok(raw.parse().unwrap_or(0.0))
    }

    fn capture_frame(&mut self, path: &Path) -> Result<()> {
        let png =
            self.tab
                .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)?;
        std::fs::write(path, png)?;
        Ok(())
    }

    fn close(self: Box<Self>) {
        info!("browser closed");
    }
}
