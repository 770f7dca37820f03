//! Native installer windows
//!
//! Every item is a setup file. Acquiring a surface starts it as its own
//! process and binds the wizard window it opens; elements inside that window
//! are found by caption through UI Automation. The automation part only
//! exists on Windows.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

/// Lookups give up quickly; the poll loop above them does the waiting.
#[cfg_attr(not(windows), allow(dead_code))]
const LOOKUP_TIMEOUT_MS: u64 = 100;

/// How installers are started and their window found.
#[derive(Debug, Clone)]
pub struct DesktopOptions {
    /// Title fragment accepted when no window of the started process shows
    /// up, e.g. when `msiexec` hands the UI to its service process
    pub window_title: Option<String>,
    pub window_timeout: Duration,
    /// How long a finished item's installer may take to exit by itself
    pub exit_grace: Duration,
    /// Stop installers still running after `exit_grace`
    pub kill_on_release: bool,
}

impl Default for DesktopOptions {
    fn default() -> Self {
        Self {
            window_title: Some("Setup".to_string()),
            window_timeout: Duration::from_secs(30),
            exit_grace: Duration::from_secs(5),
            kill_on_release: true,
        }
    }
}

/// Program and arguments that run the installer at `path`. Windows Installer
/// packages go through `msiexec /i`; anything else is executed directly.
pub fn installer_command(path: &Path) -> (OsString, Vec<OsString>) {
    let is_msi = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("msi"));

    if is_msi {
        (
            OsString::from("msiexec"),
            vec![OsString::from("/i"), path.as_os_str().to_owned()],
        )
    } else {
        (path.as_os_str().to_owned(), Vec::new())
    }
}

#[cfg(windows)]
pub use uia::{DesktopElement, DesktopProvider, DesktopSurface};

#[cfg(windows)]
mod uia {
    use super::{installer_command, DesktopOptions, LOOKUP_TIMEOUT_MS};
    use crate::error::{Result, SurfaceError};
    use crate::poll::wait_until;
    use crate::source::{Item, PATH_FIELD};
    use crate::surface::{Interaction, Selector, SurfaceDriver, SurfaceProvider};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::process::{Child, Command};
    use uiautomation::controls::ControlType;
    use uiautomation::patterns::{
        UIExpandCollapsePattern, UIInvokePattern, UISelectionItemPattern, UIValuePattern,
    };
    use uiautomation::{UIAutomation, UIElement};

    const WINDOW_POLL: Duration = Duration::from_millis(500);

    /// The process-wide UI Automation client.
    #[derive(Clone)]
    struct Automation(Arc<UIAutomation>);

    // Safety: the client is created in the multithreaded apartment, where
    // its COM objects may be called from any thread.
    unsafe impl Send for Automation {}
    unsafe impl Sync for Automation {}

    /// A control inside an installer window.
    #[derive(Clone)]
    pub struct DesktopElement(Arc<UIElement>);

    // Safety: same apartment as `Automation`.
    unsafe impl Send for DesktopElement {}
    unsafe impl Sync for DesktopElement {}

    fn failed(e: uiautomation::Error) -> SurfaceError {
        SurfaceError::InteractionFailed(e.to_string())
    }

    /// UI Automation calls block; keep them off the runtime's worker threads
    /// so a hung window cannot stall a poll past its deadline.
    async fn blocking<T, F>(f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| SurfaceError::Other(e.to_string()))?
    }

    /// Top-level window owned by `pid`, else one whose title contains
    /// `title`.
    fn find_window(automation: &Automation, pid: u32, title: Option<&str>) -> Option<UIElement> {
        let root = automation.0.get_root_element().ok()?;

        let owned = automation
            .0
            .create_matcher()
            .from_ref(&root)
            .control_type(ControlType::Window)
            .filter_fn(Box::new(move |e: &UIElement| {
                Ok(e.get_process_id().map(|p| p == pid).unwrap_or(false))
            }))
            .timeout(LOOKUP_TIMEOUT_MS)
            .find_first();
        if let Ok(window) = owned {
            return Some(window);
        }

        let title = title?.to_string();
        automation
            .0
            .create_matcher()
            .from_ref(&root)
            .control_type(ControlType::Window)
            .filter_fn(Box::new(move |e: &UIElement| {
                Ok(e.get_name().map(|n| n.contains(&title)).unwrap_or(false))
            }))
            .timeout(LOOKUP_TIMEOUT_MS)
            .find_first()
            .ok()
    }

    /// First descendant of `scope` named exactly `name`.
    fn find_named(automation: &Automation, scope: &UIElement, name: &str) -> Option<UIElement> {
        let name = name.to_string();
        automation
            .0
            .create_matcher()
            .from_ref(scope)
            .filter_fn(Box::new(move |e: &UIElement| {
                Ok(e.get_name().map(|n| n == name).unwrap_or(false))
            }))
            .timeout(LOOKUP_TIMEOUT_MS)
            .find_first()
            .ok()
    }

    fn select_option(automation: &Automation, list: &UIElement, value: &str) -> Result<()> {
        if let Ok(expand) = list.get_pattern::<UIExpandCollapsePattern>() {
            expand.expand().map_err(failed)?;
        }

        let option = find_named(automation, list, value).ok_or_else(|| {
            SurfaceError::InteractionFailed(format!("no option named '{}'", value))
        })?;
        match option.get_pattern::<UISelectionItemPattern>() {
            Ok(item) => item.select().map_err(failed)?,
            Err(_) => option.click().map_err(failed)?,
        }

        if let Ok(expand) = list.get_pattern::<UIExpandCollapsePattern>() {
            let _ = expand.collapse();
        }
        Ok(())
    }

    /// Starts each item's installer and binds its wizard window.
    pub struct DesktopProvider {
        automation: Automation,
        options: DesktopOptions,
    }

    impl DesktopProvider {
        pub fn new(options: DesktopOptions) -> Result<Self> {
            let automation = UIAutomation::new().map_err(|e| {
                SurfaceError::LaunchFailed(format!("UI Automation unavailable: {}", e))
            })?;
            Ok(Self {
                automation: Automation(Arc::new(automation)),
                options,
            })
        }

        pub fn options(&self) -> &DesktopOptions {
            &self.options
        }
    }

    #[async_trait]
    impl SurfaceProvider for DesktopProvider {
        type Surface = DesktopSurface;

        async fn acquire(&self, item: &Item) -> Result<DesktopSurface> {
            let path = item.field(PATH_FIELD).ok_or_else(|| {
                SurfaceError::LaunchFailed(format!("item {} has no installer path", item.id))
            })?;
            let (program, args) = installer_command(Path::new(path));

            log::debug!("Starting installer {}", path);
            let mut child = Command::new(&program).args(&args).spawn().map_err(|e| {
                SurfaceError::LaunchFailed(format!("Failed to start {}: {}", path, e))
            })?;
            let pid = child.id().ok_or_else(|| {
                SurfaceError::LaunchFailed(format!("{} exited before opening a window", path))
            })?;

            let window = wait_until(
                || {
                    let automation = self.automation.clone();
                    let title = self.options.window_title.clone();
                    async move {
                        blocking(move || {
                            Ok(find_window(&automation, pid, title.as_deref())
                                .map(|w| DesktopElement(Arc::new(w))))
                        })
                        .await
                        .ok()
                        .flatten()
                    }
                },
                self.options.window_timeout,
                WINDOW_POLL,
            )
            .await;

            let window = match window {
                Ok(found) => found.value,
                Err(e) => {
                    let _ = child.start_kill();
                    return Err(SurfaceError::LaunchFailed(format!(
                        "no installer window for {}: {}",
                        path, e
                    )));
                }
            };

            Ok(DesktopSurface {
                automation: self.automation.clone(),
                window,
                child: Mutex::new(child),
                pid,
                exit_grace: self.options.exit_grace,
                kill_on_release: self.options.kill_on_release,
            })
        }
    }

    /// One running installer and its wizard window.
    pub struct DesktopSurface {
        automation: Automation,
        window: DesktopElement,
        child: Mutex<Child>,
        pid: u32,
        exit_grace: Duration,
        kill_on_release: bool,
    }

    #[async_trait]
    impl SurfaceDriver for DesktopSurface {
        type Element = DesktopElement;

        async fn locate(&self, selector: &Selector) -> Result<Option<DesktopElement>> {
            let Selector::Caption(caption) = selector else {
                return Err(SurfaceError::Unsupported(format!(
                    "{} in a desktop window",
                    selector
                )));
            };

            // UI Automation names carry no accelerator markers
            let name = caption.replace('&', "");
            let automation = self.automation.clone();
            let window = self.window.clone();
            blocking(move || {
                Ok(find_named(&automation, &window.0, &name).map(|e| DesktopElement(Arc::new(e))))
            })
            .await
        }

        async fn act(&self, element: &DesktopElement, interaction: &Interaction) -> Result<()> {
            let automation = self.automation.clone();
            let element = element.clone();
            let interaction = interaction.clone();

            blocking(move || {
                let target = &element.0;
                match &interaction {
                    Interaction::Click => target.click().map_err(failed),
                    Interaction::ScriptClick => target
                        .get_pattern::<UIInvokePattern>()
                        .and_then(|invoke| invoke.invoke())
                        .map_err(failed),
                    Interaction::TypeText(text) => match target.get_pattern::<UIValuePattern>() {
                        Ok(value) => value.set_value(text).map_err(failed),
                        Err(_) => target.send_text(text, 10).map_err(failed),
                    },
                    Interaction::PressKey(key) => target
                        .send_keys(&format!("{{{}}}", key.to_lowercase()), 10)
                        .map_err(failed),
                    Interaction::SelectOption(value) => select_option(&automation, target, value),
                }
            })
            .await
        }

        async fn read_value(&self, selector: &Selector) -> Result<Option<String>> {
            let Some(element) = self.locate(selector).await? else {
                return Ok(None);
            };
            blocking(move || {
                Ok(Some(
                    element
                        .0
                        .get_pattern::<UIValuePattern>()
                        .and_then(|value| value.get_value())
                        .unwrap_or_default(),
                ))
            })
            .await
        }

        async fn current_location_token(&self) -> Result<String> {
            let window = self.window.clone();
            blocking(move || window.0.get_name().map_err(|_| SurfaceError::Gone)).await
        }

        async fn release(self) -> Result<()> {
            let mut child = self
                .child
                .into_inner()
                .map_err(|_| SurfaceError::Other("installer handle poisoned".to_string()))?;

            match tokio::time::timeout(self.exit_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("Installer {} exited with {}", self.pid, status);
                }
                Ok(Err(e)) => return Err(SurfaceError::Other(e.to_string())),
                Err(_) if self.kill_on_release => {
                    log::info!("Installer {} still running, stopping it", self.pid);
                    child
                        .kill()
                        .await
                        .map_err(|e| SurfaceError::Other(e.to_string()))?;
                }
                Err(_) => {
                    log::info!("Leaving installer {} running", self.pid);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exe_runs_directly() {
        let (program, args) = installer_command(Path::new("C:/Setup/zoom.exe"));
        assert_eq!(program, OsString::from("C:/Setup/zoom.exe"));
        assert!(args.is_empty());
    }

    #[test]
    fn test_msi_goes_through_msiexec() {
        let (program, args) = installer_command(Path::new("C:/Setup/Agent.MSI"));
        assert_eq!(program, OsString::from("msiexec"));
        assert_eq!(
            args,
            vec![OsString::from("/i"), OsString::from("C:/Setup/Agent.MSI")]
        );
    }

    #[test]
    fn test_default_window_match() {
        let options = DesktopOptions::default();
        assert_eq!(options.window_title.as_deref(), Some("Setup"));
        assert!(options.kill_on_release);
    }
}
