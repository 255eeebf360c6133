use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use crate::error::{AgentError, Result};

/// Browser session boundary. The loop depends only on this contract, not on
/// a specific engine; tests drive the loop with a scripted fake.
///
/// All methods block; callers run them through `spawn_blocking`.
pub trait Session: Send + Sync {
    fn navigate(&self, url: &str) -> Result<()>;
    /// Resolve a target descriptor and click it. Resolution priority:
    /// CSS-looking selectors, accessible role+name, exact visible text,
    /// then a fixed list of structural fallbacks. First match wins;
    /// `TargetNotFound` if nothing matches.
    fn find_and_click(&self, descriptor: &str) -> Result<()>;
    /// Resolve a target descriptor to an editable field and type into it.
    fn find_and_fill(&self, descriptor: &str, value: &str) -> Result<()>;
    fn wait_millis(&self, ms: u64);
    fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()>;
    /// Full-page PNG snapshot.
    fn screenshot(&self) -> Result<Vec<u8>>;
    fn current_url(&self) -> Result<String>;
    fn visible_text(&self) -> Result<String>;
    fn close(&self);
}

/// Attribute the resolver scripts stamp on the matched element so the
/// click/fill can go through the browser's real input path.
const MARK_SELECTOR: &str = "[data-uiscribe-target]";

/// Finds the element a click descriptor refers to and marks it.
/// Returns the name of the strategy that matched, or null.
const CLICK_RESOLVER_JS: &str = r#"(() => {
  const label = __LABEL__;
  const MARK = 'data-uiscribe-target';
  document.querySelectorAll('[' + MARK + ']').forEach(el => el.removeAttribute(MARK));
  const visible = (el) => {
    if (!el) return false;
    const r = el.getBoundingClientRect();
    if (r.width === 0 && r.height === 0) return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden';
  };
  const mark = (el, how) => { el.setAttribute(MARK, '1'); return how; };
  const norm = (t) => (t || '').trim().replace(/\s+/g, ' ').toLowerCase();
  const wanted = norm(label);

  if (/[#.\[>:]/.test(label)) {
    try {
      const el = document.querySelector(label);
      if (visible(el)) return mark(el, 'css');
    } catch (e) {}
  }

  const accName = (el) =>
    norm(el.getAttribute('aria-label') || el.textContent || el.value || el.title);
  const roleCandidates = document.querySelectorAll(
    "button, [role='button'], a, [role='link'], [role='tab'], input[type='submit'], summary");
  for (const el of roleCandidates) {
    if (wanted && visible(el) && accName(el) === wanted) return mark(el, 'role');
  }
  for (const el of roleCandidates) {
    if (wanted && visible(el) && accName(el).includes(wanted)) return mark(el, 'role');
  }

  if (wanted) {
    for (const el of document.querySelectorAll('body *')) {
      if (el.children.length === 0 && visible(el) && norm(el.textContent) === wanted)
        return mark(el, 'text');
    }
  }

  for (const sel of ["form button[type='submit']", "button[type='submit']", "[type='submit']"]) {
    const el = document.querySelector(sel);
    if (visible(el)) return mark(el, 'structural');
  }
  return null;
})()"#;

/// Same idea for fill targets: CSS, then placeholder/aria-label/name/id,
/// then `<label>` association, then first visible text input.
const FILL_RESOLVER_JS: &str = r#"(() => {
  const label = __LABEL__;
  const MARK = 'data-uiscribe-target';
  document.querySelectorAll('[' + MARK + ']').forEach(el => el.removeAttribute(MARK));
  const visible = (el) => {
    if (!el) return false;
    const r = el.getBoundingClientRect();
    if (r.width === 0 && r.height === 0) return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden';
  };
  const mark = (el, how) => { el.setAttribute(MARK, '1'); return how; };
  const norm = (t) => (t || '').trim().replace(/\s+/g, ' ').toLowerCase();
  const wanted = norm(label);
  const editable = (el) => el && (el.tagName === 'TEXTAREA' ||
    (el.tagName === 'INPUT' &&
     !['hidden','checkbox','radio','button','submit','file'].includes(el.type)));

  if (/[#.\[>:]/.test(label)) {
    try {
      const el = document.querySelector(label);
      if (editable(el) && visible(el)) return mark(el, 'css');
    } catch (e) {}
  }

  for (const el of document.querySelectorAll('input, textarea')) {
    if (!editable(el) || !visible(el)) continue;
    const names = [el.placeholder, el.getAttribute('aria-label'), el.name, el.id].map(norm);
    if (wanted && names.some(n => n && (n === wanted || n.includes(wanted))))
      return mark(el, 'named');
  }

  if (wanted) {
    for (const lab of document.querySelectorAll('label')) {
      if (norm(lab.textContent).includes(wanted)) {
        const el = lab.control || document.getElementById(lab.htmlFor);
        if (editable(el) && visible(el)) return mark(el, 'label');
      }
    }
  }

  for (const sel of ["input[type='search']", "input[type='text']", "input", "textarea"]) {
    for (const el of document.querySelectorAll(sel)) {
      if (editable(el) && visible(el)) return mark(el, 'structural');
    }
  }
  return null;
})()"#;

const CLEAR_MARKED_VALUE_JS: &str =
    "const el = document.querySelector('[data-uiscribe-target]'); if (el) { el.focus(); el.value = ''; }";

const UNMARK_JS: &str = "document.querySelectorAll('[data-uiscribe-target]').forEach(el => el.removeAttribute('data-uiscribe-target'))";

/// Live Chrome session. One tab, reused for the whole run; Chrome is torn
/// down when the struct drops.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
    find_timeout_ms: u64,
}

impl ChromeSession {
    pub fn launch(headless: bool, find_timeout_ms: u64) -> Result<Self> {
        info!(headless, "launching Chrome");
        let options = LaunchOptions {
            headless,
            window_size: Some((1440, 900)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        let browser = Browser::new(options)
            .map_err(|e| AgentError::SessionUnavailable(format!("browser launch failed: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| AgentError::SessionUnavailable(format!("could not open tab: {e}")))?;
        tab.navigate_to("about:blank")
            .map_err(|e| AgentError::SessionUnavailable(e.to_string()))?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
            find_timeout_ms,
        })
    }

    /// Run the resolver script for a descriptor and report which strategy
    /// matched, if any. Evaluation failure means the session itself is gone.
    fn resolve(&self, descriptor: &str, resolver: &str) -> Result<Option<String>> {
        let label = serde_json::to_string(descriptor)?;
        let js = resolver.replacen("__LABEL__", &label, 1);
        let result = self
            .tab
            .evaluate(&js, false)
            .map_err(|e| AgentError::SessionUnavailable(e.to_string()))?;
        Ok(result.value.and_then(|v| v.as_str().map(String::from)))
    }

    fn marked_element(&self) -> Result<headless_chrome::Element<'_>> {
        self.tab
            .wait_for_element_with_custom_timeout(
                MARK_SELECTOR,
                Duration::from_millis(self.find_timeout_ms),
            )
            .map_err(|e| AgentError::ActionTimeout(format!("resolved element lookup: {e}")))
    }

    fn unmark(&self) {
        let _ = self.tab.evaluate(UNMARK_JS, false);
    }
}

impl Session for ChromeSession {
    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_for_element("body"))
            .map_err(|e| AgentError::SessionUnavailable(format!("navigate to {url}: {e}")))?;
        Ok(())
    }

    fn find_and_click(&self, descriptor: &str) -> Result<()> {
        let Some(strategy) = self.resolve(descriptor, CLICK_RESOLVER_JS)? else {
            return Err(AgentError::TargetNotFound(descriptor.to_string()));
        };
        debug!(descriptor, %strategy, "click target resolved");

        let element = self.marked_element()?;
        let clicked = element
            .click()
            .map_err(|e| AgentError::ActionTimeout(format!("click '{descriptor}': {e}")));
        self.unmark();
        clicked?;
        Ok(())
    }

    fn find_and_fill(&self, descriptor: &str, value: &str) -> Result<()> {
        let Some(strategy) = self.resolve(descriptor, FILL_RESOLVER_JS)? else {
            return Err(AgentError::TargetNotFound(descriptor.to_string()));
        };
        debug!(descriptor, %strategy, "fill target resolved");

        let element = self.marked_element()?;
        let filled = element
            .click()
            .and_then(|_| self.tab.evaluate(CLEAR_MARKED_VALUE_JS, false))
            .and_then(|_| self.tab.type_str(value).map(|_| ()))
            .map_err(|e| AgentError::ActionTimeout(format!("type into '{descriptor}': {e}")));
        self.unmark();
        filled?;
        Ok(())
    }

    fn wait_millis(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, Duration::from_millis(timeout_ms))
            .map_err(|e| AgentError::ActionTimeout(format!("wait for '{selector}': {e}")))?;
        Ok(())
    }

    fn screenshot(&self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| AgentError::SessionUnavailable(format!("screenshot failed: {e}")))
    }

    fn current_url(&self) -> Result<String> {
        let result = self
            .tab
            .evaluate("window.location.href", false)
            .map_err(|e| AgentError::SessionUnavailable(e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "unknown".to_string()))
    }

    fn visible_text(&self) -> Result<String> {
        let result = self
            .tab
            .evaluate(
                "(document.body && document.body.innerText) || ''",
                false,
            )
            .map_err(|e| AgentError::SessionUnavailable(e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    fn close(&self) {
        // Chrome is owned by `_browser` and torn down on drop; nothing else
        // to release here.
        debug!("closing browser session");
    }
}
