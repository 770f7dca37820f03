// spider_chrome re-exports chromiumoxide API
use crate::error::{Result, SurfaceError};
use crate::source::Item;
use crate::surface::{Interaction, Selector, SurfaceDriver, SurfaceProvider};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::task::JoinHandle;

/// How each per-item Chrome instance is launched.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Page opened before the first step runs
    pub start_url: String,
    pub chrome_path: Option<PathBuf>,
    /// Linux workaround for AppArmor restrictions
    pub no_sandbox: bool,
    pub headless: bool,
}

impl LaunchOptions {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            chrome_path: None,
            no_sandbox: false,
            headless: false,
        }
    }

    /// Headless and sandbox-free when running under CI
    pub fn auto(start_url: impl Into<String>) -> Self {
        let is_ci = std::env::var("CI").is_ok()
            || std::env::var("GITHUB_ACTIONS").is_ok()
            || std::env::var("GITLAB_CI").is_ok()
            || std::env::var("JENKINS_HOME").is_ok();

        Self {
            no_sandbox: is_ci,
            headless: is_ci,
            ..Self::new(start_url)
        }
    }
}

/// Launches a fresh, isolated Chrome for every item.
pub struct ChromeProvider {
    options: LaunchOptions,
}

impl ChromeProvider {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }
}

#[async_trait]
impl SurfaceProvider for ChromeProvider {
    type Surface = ChromeSurface;

    async fn acquire(&self, item: &Item) -> Result<ChromeSurface> {
        log::debug!("Launching Chrome for item {}", item.id);
        ChromeSurface::launch(&self.options).await
    }
}

/// One Chrome instance with a single page, driven through CDP.
pub struct ChromeSurface {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    temp_dir: PathBuf,
}

impl ChromeSurface {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        // Unique profile directory per instance so consecutive items never
        // share cookies or session state
        let unique_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let temp_dir = std::env::temp_dir().join(format!("wizard-autopilot-{}", unique_id));
        std::fs::create_dir_all(&temp_dir).map_err(|e| {
            SurfaceError::LaunchFailed(format!("Failed to create temp directory: {}", e))
        })?;

        let mut config = if options.headless {
            BrowserConfig::builder()
        } else {
            BrowserConfig::builder().with_head()
        };
        config = config.user_data_dir(&temp_dir);

        if options.no_sandbox {
            config = config.arg("--no-sandbox");
        }
        if let Some(path) = &options.chrome_path {
            config = config.chrome_executable(path);
        }

        let config = config.build().map_err(|e| {
            SurfaceError::LaunchFailed(format!(
                "{}. \n\n\
                 Chrome not found. You can:\n\
                 - Install Chrome: https://www.google.com/chrome/\n\
                 - Or specify path: --chrome-path /path/to/chrome\n\
                 - Linux sandbox issue? Try: --no-sandbox",
                e
            ))
        })?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SurfaceError::LaunchFailed(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while (handler.next().await).is_some() {
                // Drain browser events
            }
        });

        let page = browser
            .new_page(options.start_url.as_str())
            .await
            .map_err(|e| {
                SurfaceError::LaunchFailed(format!(
                    "Failed to open {}: {}",
                    options.start_url, e
                ))
            })?;

        Ok(Self {
            browser,
            page,
            handler,
            temp_dir,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

/// Quote a string as an XPath literal, falling back to concat() when it
/// contains both quote kinds.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// XPath matching a button (or button-like element) by visible caption.
/// Win32-style accelerator markers (`&Next`) are dropped.
fn caption_xpath(caption: &str) -> String {
    let literal = xpath_literal(&caption.replace('&', ""));
    format!(
        "//button[normalize-space()={lit}] | //*[@role='button'][normalize-space()={lit}] | //input[@type='submit' and @value={lit}]",
        lit = literal
    )
}

/// Select the `<option>` whose value is `value` and fire the events a user
/// selection would. Returns false when there is no such option.
fn select_option_js(value: &str) -> String {
    let wanted = serde_json::Value::String(value.to_string());
    format!(
        "function() {{
            const wanted = {};
            const option = Array.from(this.options || []).find(o => o.value === wanted);
            if (!option) return false;
            this.value = wanted;
            this.dispatchEvent(new Event('input', {{ bubbles: true }}));
            this.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }}",
        wanted
    )
}

#[async_trait]
impl SurfaceDriver for ChromeSurface {
    type Element = Element;

    async fn locate(&self, selector: &Selector) -> Result<Option<Element>> {
        let found = match selector {
            Selector::Css(css) => self.page.find_element(css.as_str()).await,
            Selector::Xpath(xpath) => self.page.find_xpath(xpath.as_str()).await,
            Selector::Caption(caption) => self.page.find_xpath(caption_xpath(caption)).await,
        };

        match found {
            Ok(element) => Ok(Some(element)),
            Err(e) => {
                log::trace!("{} not located: {}", selector, e);
                Ok(None)
            }
        }
    }

    async fn act(&self, element: &Element, interaction: &Interaction) -> Result<()> {
        match interaction {
            Interaction::Click => {
                element.click().await?;
            }
            Interaction::ScriptClick => {
                element
                    .call_js_fn("function() { this.click(); }", false)
                    .await?;
            }
            Interaction::TypeText(text) => {
                element.focus().await?;
                element.type_str(text).await?;
            }
            Interaction::PressKey(key) => {
                element.press_key(key).await?;
            }
            Interaction::SelectOption(value) => {
                let selected = element
                    .call_js_fn(select_option_js(value), false)
                    .await?
                    .result
                    .value;
                if selected != Some(serde_json::Value::Bool(true)) {
                    return Err(SurfaceError::InteractionFailed(format!(
                        "no option with value '{}'",
                        value
                    )));
                }
            }
        }
        Ok(())
    }

    async fn read_value(&self, selector: &Selector) -> Result<Option<String>> {
        let Some(element) = self.locate(selector).await? else {
            return Ok(None);
        };
        let value = element
            .call_js_fn(
                "function() { return this.value == null ? '' : String(this.value); }",
                false,
            )
            .await?
            .result
            .value;
        Ok(Some(
            value
                .as_ref()
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ))
    }

    async fn current_location_token(&self) -> Result<String> {
        self.page
            .url()
            .await
            .map_err(|e| SurfaceError::Other(e.to_string()))?
            .ok_or(SurfaceError::Gone)
    }

    async fn release(mut self) -> Result<()> {
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        closed.map_err(|e| SurfaceError::Other(e.to_string()))?;
        Ok(())
    }
}

impl Drop for ChromeSurface {
    fn drop(&mut self) {
        if self.temp_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.temp_dir);
        }
    }
}
