use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton as CdpButton,
};
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCacheParams, ClearBrowserCookiesParams};
use chromiumoxide::cdp::browser_protocol::page::{BringToFrontParams, CaptureScreenshotFormat};
use chromiumoxide::layout::Point as CdpPoint;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use nanoid::nanoid;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::surface::{
    now_ms, ActionOutcome, MouseButton, Observation, Point, Surface, SurfaceAction, SurfaceError, SurfaceKind, TabInfo,
};

#[derive(Clone, Debug)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None, width: 1280, height: 800 }
    }
}

struct Tabs {
    pages: Vec<Page>,
    active: usize,
}

/// Chromium over CDP, exposed as a [`Surface`].
pub struct Browser {
    browser: OxideBrowser,
    tabs: Mutex<Tabs>,
    cfg: BrowserConfig,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder().window_size(cfg.width, cfg.height);
        if !cfg.headless {
            builder = builder.with_head();
        }
        // A fresh profile per launch avoids ProcessSingleton lock conflicts between instances.
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("glass-pilot-profile-{}-{}", std::process::id(), now_ms()));
        std::fs::create_dir_all(&profile_dir).context("failed to create browser profile dir")?;
        builder = builder
            .user_data_dir(profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await.context("failed to launch chromium")?;
        tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        info!(headless = cfg.headless, width = cfg.width, height = cfg.height, "chromium launched");
        Self::init(browser, cfg).await
    }

    /// Attaches to a running Chromium through its DevTools websocket URL.
    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url)
            .await
            .with_context(|| format!("failed to connect to {ws_url}"))?;
        tokio::spawn(async move { while let Some(_ev) = handler.next().await {} });
        info!(ws_url, "connected to chromium");
        Self::init(browser, cfg).await
    }

    async fn init(browser: OxideBrowser, cfg: BrowserConfig) -> Result<Self> {
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = &cfg.user_agent {
            page.set_user_agent(ua.clone()).await?;
        }
        let this = Self { browser, tabs: Mutex::new(Tabs { pages: Vec::new(), active: 0 }), cfg };
        this.fit_viewport(&page).await?;
        this.tabs.lock().await.pages.push(page);
        Ok(this)
    }

    // Screenshots fail with a 0-width viewport, and coordinates assume the configured size.
    async fn fit_viewport(&self, page: &Page) -> Result<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(self.cfg.width))
            .height(i64::from(self.cfg.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(metrics).await?;
        Ok(())
    }

    async fn page(&self) -> Result<Page> {
        let tabs = self.tabs.lock().await;
        tabs.pages.get(tabs.active).cloned().context("no open tab")
    }

    /// Picks up tabs opened by the page itself (popups, target=_blank) and drops closed ones.
    async fn sync_tabs(&self) -> Result<()> {
        let live = self.browser.pages().await?;
        let mut tabs = self.tabs.lock().await;
        let active_id = tabs.pages.get(tabs.active).map(|p| p.target_id().clone());
        tabs.pages.retain(|p| live.iter().any(|l| l.target_id() == p.target_id()));
        for page in live {
            if !tabs.pages.iter().any(|p| p.target_id() == page.target_id()) {
                tabs.pages.push(page);
            }
        }
        let active = active_id
            .and_then(|id| tabs.pages.iter().position(|p| *p.target_id() == id))
            .unwrap_or(0);
        tabs.active = active;
        Ok(())
    }

    async fn tab_list(&self) -> Result<Vec<TabInfo>> {
        let (pages, active) = {
            let tabs = self.tabs.lock().await;
            (tabs.pages.clone(), tabs.active)
        };
        let mut out = Vec::with_capacity(pages.len());
        for (index, page) in pages.iter().enumerate() {
            out.push(TabInfo {
                index,
                title: page.get_title().await?.unwrap_or_default(),
                url: page.url().await?.unwrap_or_default(),
                active: index == active,
            });
        }
        Ok(out)
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        let page = self.page().await?;
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page().await?.url().await?.unwrap_or_default())
    }

    async fn open_page(&self, url: &str) -> Result<Page> {
        let page = self.browser.new_page(url).await?;
        self.fit_viewport(&page).await?;
        if let Some(ua) = &self.cfg.user_agent {
            page.set_user_agent(ua.clone()).await?;
        }
        page.wait_for_navigation().await?;
        Ok(page)
    }

    async fn new_tab(&self, url: &str) -> Result<()> {
        let page = self.open_page(url).await?;
        let mut tabs = self.tabs.lock().await;
        tabs.pages.push(page);
        tabs.active = tabs.pages.len() - 1;
        Ok(())
    }

    /// Cookies and cache are browser-wide over CDP; web storage is per origin, so only the
    /// active page's storage is cleared.
    async fn clear_cookies(&self) -> Result<()> {
        let page = self.page().await?;
        page.execute(ClearBrowserCookiesParams::default()).await?;
        page.execute(ClearBrowserCacheParams::default()).await?;
        // about:blank and opaque origins throw on storage access
        if let Err(e) = page.evaluate("localStorage.clear(); sessionStorage.clear();").await {
            debug!(error = %e, "web storage not cleared");
        }
        Ok(())
    }

    /// Clears state, opens a fresh tab at `url` and closes every other tab.
    async fn reset(&self, url: &str) -> Result<usize> {
        self.clear_cookies().await?;
        self.sync_tabs().await?;
        let fresh = self.open_page(url).await?;
        let old = {
            let mut tabs = self.tabs.lock().await;
            let old = std::mem::replace(&mut tabs.pages, vec![fresh]);
            tabs.active = 0;
            old
        };
        let closed = old.len();
        for page in old {
            if let Err(e) = page.close().await {
                warn!(error = %e, "failed to close tab during reset");
            }
        }
        Ok(closed)
    }

    async fn switch_tab(&self, index: usize) -> Result<String> {
        self.sync_tabs().await?;
        let page = {
            let mut tabs = self.tabs.lock().await;
            let Some(page) = tabs.pages.get(index).cloned() else {
                bail!("no tab at index {index} ({} open)", tabs.pages.len());
            };
            tabs.active = index;
            page
        };
        page.execute(BringToFrontParams::default()).await?;
        Ok(page.url().await?.unwrap_or_default())
    }

    async fn mouse(&self, page: &Page, kind: DispatchMouseEventType, at: Point, button: MouseButton, clicks: i64) -> Result<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(f64::from(at.x))
            .y(f64::from(at.y))
            .button(cdp_button(button))
            .click_count(clicks)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(params).await?;
        Ok(())
    }

    async fn move_mouse(&self, page: &Page, at: Point) -> Result<()> {
        page.move_mouse(CdpPoint { x: f64::from(at.x), y: f64::from(at.y) }).await?;
        Ok(())
    }

    async fn click(&self, at: Point, button: MouseButton, clicks: i64, hold: Duration) -> Result<()> {
        let page = self.page().await?;
        self.move_mouse(&page, at).await?;
        self.mouse(&page, DispatchMouseEventType::MousePressed, at, button, clicks).await?;
        if !hold.is_zero() {
            sleep(hold).await;
        }
        self.mouse(&page, DispatchMouseEventType::MouseReleased, at, button, clicks).await
    }

    async fn drag(&self, from: Point, to: Point, button: MouseButton) -> Result<()> {
        let page = self.page().await?;
        self.move_mouse(&page, from).await?;
        self.mouse(&page, DispatchMouseEventType::MousePressed, from, button, 1).await?;
        let mid = Point { x: (from.x + to.x) / 2, y: (from.y + to.y) / 2 };
        for p in [mid, to] {
            let moved = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(f64::from(p.x))
                .y(f64::from(p.y))
                .button(cdp_button(button))
                .build()
                .map_err(|e| anyhow!(e))?;
            page.execute(moved).await?;
        }
        self.mouse(&page, DispatchMouseEventType::MouseReleased, to, button, 1).await
    }

    async fn scroll(&self, dx: i64, dy: i64) -> Result<()> {
        let page = self.page().await?;
        let wheel = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(f64::from(self.cfg.width / 2))
            .y(f64::from(self.cfg.height / 2))
            .delta_x(dx as f64)
            .delta_y(dy as f64)
            .build()
            .map_err(|e| anyhow!(e))?;
        page.execute(wheel).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.page().await?.execute(InsertTextParams { text: text.to_string() }).await?;
        Ok(())
    }

    async fn key_event(&self, page: &Page, kind: DispatchKeyEventType, key: &KeySpec, modifiers: i64) -> Result<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.key.clone())
            .code(key.code.clone())
            .windows_virtual_key_code(key.vk)
            .modifiers(modifiers);
        // Only an unmodified keydown produces text input.
        if kind == DispatchKeyEventType::KeyDown && modifiers & !MOD_SHIFT == 0 {
            if let Some(text) = &key.text {
                builder = builder.text(text.clone());
            }
        }
        page.execute(builder.build().map_err(|e| anyhow!(e))?).await?;
        Ok(())
    }

    /// Holds every key but the last, presses the last one, then releases in reverse order.
    async fn press_keys(&self, keys: &[String]) -> Result<()> {
        let Some((last, held)) = keys.split_last() else {
            return Ok(());
        };
        let page = self.page().await?;
        let held: Vec<KeySpec> = held.iter().map(|k| key_spec(k)).collect();
        let mut modifiers = 0;
        for k in &held {
            modifiers |= k.modifier;
            self.key_event(&page, DispatchKeyEventType::KeyDown, k, modifiers).await?;
        }
        let main = key_spec(last);
        self.key_event(&page, DispatchKeyEventType::KeyDown, &main, modifiers).await?;
        self.key_event(&page, DispatchKeyEventType::KeyUp, &main, modifiers).await?;
        for k in held.iter().rev() {
            modifiers &= !k.modifier;
            self.key_event(&page, DispatchKeyEventType::KeyUp, k, modifiers).await?;
        }
        Ok(())
    }

    async fn clear_focused(&self) -> Result<()> {
        self.press_keys(&["ctrl".to_string(), "a".to_string()]).await?;
        self.press_keys(&["delete".to_string()]).await?;
        sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    pub async fn screenshot_b64(&self) -> Result<String> {
        let page = self.page().await?;
        let take = || async {
            page.screenshot(
                ScreenshotParamsBuilder::default()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(false)
                    .build(),
            )
            .await
        };
        match take().await {
            Ok(bytes) => Ok(STANDARD.encode(bytes)),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("0 width") || msg.contains("0 height") {
                    self.fit_viewport(&page).await?;
                    sleep(Duration::from_millis(50)).await;
                    let bytes = take().await?;
                    return Ok(STANDARD.encode(bytes));
                }
                Err(anyhow!(e))
            }
        }
    }

    pub async fn wait_for_stable(&self) {
        sleep(Duration::from_millis(500)).await;
    }

    async fn observe(&self) -> Result<Observation> {
        self.sync_tabs().await?;
        let image_base64 = self.screenshot_b64().await?;
        let tabs = self.tab_list().await?;
        let url = tabs.iter().find(|t| t.active).map(|t| t.url.clone());
        Ok(Observation {
            id: nanoid!(),
            image_base64,
            mime_type: "image/png".into(),
            url,
            tabs,
            captured_at_ms: now_ms(),
        })
    }

    async fn perform(&self, action: &SurfaceAction) -> Result<ActionOutcome> {
        let outcome = match action {
            SurfaceAction::Click { at, button, hold_ms } => {
                self.click(*at, *button, 1, Duration::from_millis(*hold_ms)).await?;
                ActionOutcome::message(format!("clicked {:?} at ({}, {})", button, at.x, at.y))
            }
            SurfaceAction::DoubleClick { at, button } => {
                self.click(*at, *button, 2, Duration::ZERO).await?;
                ActionOutcome::message(format!("double-clicked at ({}, {})", at.x, at.y))
            }
            SurfaceAction::Hover { at } => {
                let page = self.page().await?;
                self.move_mouse(&page, *at).await?;
                ActionOutcome::message(format!("moved pointer to ({}, {})", at.x, at.y))
            }
            SurfaceAction::Drag { from, to, button } => {
                self.drag(*from, *to, *button).await?;
                ActionOutcome::message(format!("dragged from ({}, {}) to ({}, {})", from.x, from.y, to.x, to.y))
            }
            SurfaceAction::Scroll { dx, dy } => {
                self.scroll(*dx, *dy).await?;
                ActionOutcome::message(format!("scrolled by ({dx}, {dy})"))
            }
            SurfaceAction::TypeText { text, clear_existing } => {
                if *clear_existing {
                    self.clear_focused().await?;
                }
                self.type_text(text).await?;
                ActionOutcome::message(format!("typed {} characters", text.chars().count()))
            }
            SurfaceAction::ClearText => {
                self.clear_focused().await?;
                ActionOutcome::message("cleared text")
            }
            SurfaceAction::ClickAndType { at, text, clear_existing } => {
                self.click(*at, MouseButton::Left, 1, Duration::ZERO).await?;
                sleep(Duration::from_millis(200)).await;
                if *clear_existing {
                    self.clear_focused().await?;
                }
                if !text.is_empty() {
                    self.type_text(text).await?;
                }
                ActionOutcome::message(format!(
                    "clicked ({}, {}){}{}",
                    at.x,
                    at.y,
                    if *clear_existing { ", cleared" } else { "" },
                    if text.is_empty() { String::new() } else { format!(", typed {} characters", text.chars().count()) },
                ))
            }
            SurfaceAction::KeyPress { keys } => {
                self.press_keys(keys).await?;
                ActionOutcome::message(format!("pressed {}", keys.join("+")))
            }
            SurfaceAction::Navigate { url } => {
                self.goto(url).await?;
                ActionOutcome::message(format!("navigated to {url}"))
            }
            SurfaceAction::NewTab { url } => {
                self.new_tab(url).await?;
                ActionOutcome::message(format!("opened {url} in a new tab"))
            }
            SurfaceAction::SwitchTab { index } => {
                let url = self.switch_tab(*index).await?;
                ActionOutcome::message(format!("switched to tab {index}: {url}"))
            }
            SurfaceAction::ListTabs => {
                self.sync_tabs().await?;
                let tabs = self.tab_list().await?;
                let active = tabs.iter().position(|t| t.active);
                ActionOutcome {
                    message: format!("{} open tabs", tabs.len()),
                    data: Some(json!({ "tabs": tabs, "active_index": active })),
                }
            }
            SurfaceAction::ClearCookies => {
                self.clear_cookies().await?;
                ActionOutcome::message("cleared cookies and site data")
            }
            SurfaceAction::ResetBrowser { url } => {
                let closed = self.reset(url).await?;
                ActionOutcome {
                    message: format!("browser reset, opened {url}"),
                    data: Some(json!({ "closed_tabs": closed, "url": url })),
                }
            }
        };
        Ok(outcome)
    }
}

#[async_trait]
impl Surface for Browser {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Browser
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.cfg.width, self.cfg.height)
    }

    async fn capture(&self) -> Result<Observation, SurfaceError> {
        self.observe().await.map_err(|e| SurfaceError::Capture(format!("{e:#}")))
    }

    async fn execute(&self, action: &SurfaceAction) -> Result<ActionOutcome, SurfaceError> {
        debug!(action = ?action, "chromium action");
        let outcome = self.perform(action).await.map_err(|e| SurfaceError::Action(format!("{e:#}")))?;
        self.wait_for_stable().await;
        Ok(outcome)
    }
}

fn cdp_button(button: MouseButton) -> CdpButton {
    match button {
        MouseButton::Left => CdpButton::Left,
        MouseButton::Middle => CdpButton::Middle,
        MouseButton::Right => CdpButton::Right,
    }
}

// ========================= Key Mapping =========================

const MOD_ALT: i64 = 1;
const MOD_CTRL: i64 = 2;
const MOD_META: i64 = 4;
const MOD_SHIFT: i64 = 8;

#[derive(Clone, Debug, PartialEq)]
struct KeySpec {
    key: String,
    code: String,
    vk: i64,
    text: Option<String>,
    modifier: i64,
}

impl KeySpec {
    fn named(key: &str, code: &str, vk: i64) -> Self {
        Self { key: key.into(), code: code.into(), vk, text: None, modifier: 0 }
    }

    fn modifier(key: &str, code: &str, vk: i64, bit: i64) -> Self {
        Self { modifier: bit, ..Self::named(key, code, vk) }
    }

    fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Maps the key names models use ("ctrl", "enter", "a") onto CDP key event fields.
fn key_spec(name: &str) -> KeySpec {
    match name.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => KeySpec::modifier("Control", "ControlLeft", 17, MOD_CTRL),
        "alt" | "option" => KeySpec::modifier("Alt", "AltLeft", 18, MOD_ALT),
        "shift" => KeySpec::modifier("Shift", "ShiftLeft", 16, MOD_SHIFT),
        "meta" | "cmd" | "command" | "win" | "super" => KeySpec::modifier("Meta", "MetaLeft", 91, MOD_META),
        "enter" | "return" => KeySpec::named("Enter", "Enter", 13).with_text("\r"),
        "tab" => KeySpec::named("Tab", "Tab", 9),
        "esc" | "escape" => KeySpec::named("Escape", "Escape", 27),
        "space" | " " => KeySpec::named(" ", "Space", 32).with_text(" "),
        "backspace" => KeySpec::named("Backspace", "Backspace", 8),
        "delete" | "del" => KeySpec::named("Delete", "Delete", 46),
        "up" | "arrowup" => KeySpec::named("ArrowUp", "ArrowUp", 38),
        "down" | "arrowdown" => KeySpec::named("ArrowDown", "ArrowDown", 40),
        "left" | "arrowleft" => KeySpec::named("ArrowLeft", "ArrowLeft", 37),
        "right" | "arrowright" => KeySpec::named("ArrowRight", "ArrowRight", 39),
        "home" => KeySpec::named("Home", "Home", 36),
        "end" => KeySpec::named("End", "End", 35),
        "pageup" => KeySpec::named("PageUp", "PageUp", 33),
        "pagedown" => KeySpec::named("PageDown", "PageDown", 34),
        lower => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {
                    let upper = c.to_ascii_uppercase();
                    KeySpec::named(&c.to_string(), &format!("Key{upper}"), upper as i64).with_text(&c.to_string())
                }
                (Some(c), None) if c.is_ascii_digit() => {
                    KeySpec::named(&c.to_string(), &format!("Digit{c}"), c as i64).with_text(&c.to_string())
                }
                (Some(c), None) => KeySpec::named(&c.to_string(), "", 0).with_text(&c.to_string()),
                _ => match lower.strip_prefix('f').and_then(|n| n.parse::<i64>().ok()) {
                    Some(n @ 1..=12) => KeySpec::named(&format!("F{n}"), &format!("F{n}"), 111 + n),
                    _ => KeySpec::named(name, name, 0),
                },
            }
        }
    }
}
