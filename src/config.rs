//! Command line and the run configuration built from it.

use crate::flow::Flow;
use crate::orchestrator::RunMode;
use crate::surface::{DesktopOptions, LaunchOptions, SurfaceKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// How often watch mode re-resolves the source location.
pub const WATCH_EVERY: Duration = Duration::from_secs(2);

/// Page opened when neither the command line nor the flow names one.
pub const BLANK_PAGE: &str = "about:blank";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive every item of a source through a flow
    Run(RunArgs),

    /// Load and check a flow file without running it
    Validate {
        /// Flow file (JSON)
        flow: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Flow file (JSON)
    #[arg(long)]
    pub flow: PathBuf,

    /// Folder of installers, or a record file with --records
    #[arg(long)]
    pub source: PathBuf,

    /// Treat --source as a line-delimited record file
    #[arg(long)]
    pub records: bool,

    #[arg(long, value_enum, default_value_t = RunMode::Auto)]
    pub mode: RunMode,

    /// Where run logs go [default: <Documents>/Automatic Setup/log]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Overrides the flow's start URL
    #[arg(long)]
    pub start_url: Option<String>,

    /// Path to the Chrome executable
    #[arg(long)]
    pub chrome_path: Option<PathBuf>,

    /// Title fragment of installer windows not owned by the started process
    #[arg(long, default_value = "Setup")]
    pub window_title: String,

    #[arg(long)]
    pub headless: bool,

    /// Disable the Chrome sandbox (needed on some Linux setups)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Countdown between items, in seconds
    #[arg(long, default_value_t = 3)]
    pub between_items_secs: u64,

    /// Also write the summary as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Ring the terminal bell when the run ends
    #[arg(long)]
    pub notify: bool,

    /// Offer to reboot when the run ends
    #[arg(long)]
    pub reboot: bool,
}

/// `<Documents>/Automatic Setup/log`, falling back to the home directory and
/// then the working directory.
pub fn default_log_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Automatic Setup")
        .join("log")
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub flow_path: PathBuf,
    pub source: PathBuf,
    pub records: bool,
    pub mode: RunMode,
    pub log_dir: PathBuf,
    pub start_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub window_title: String,
    pub headless: bool,
    pub no_sandbox: bool,
    pub between_items: Duration,
    pub summary_json: Option<PathBuf>,
    pub notify: bool,
    pub reboot: bool,
    pub watch_every: Duration,
}

impl From<RunArgs> for RunConfig {
    fn from(args: RunArgs) -> Self {
        Self {
            flow_path: args.flow,
            source: args.source,
            records: args.records,
            mode: args.mode,
            log_dir: args.log_dir.unwrap_or_else(default_log_dir),
            start_url: args.start_url,
            chrome_path: args.chrome_path,
            window_title: args.window_title,
            headless: args.headless,
            no_sandbox: args.no_sandbox,
            between_items: Duration::from_secs(args.between_items_secs),
            summary_json: args.summary_json,
            notify: args.notify,
            reboot: args.reboot,
            watch_every: WATCH_EVERY,
        }
    }
}

impl RunConfig {
    /// Chrome launch settings for `flow`. CI detection can only turn
    /// headless and no-sandbox on, never off.
    pub fn launch_options(&self, flow: &Flow) -> LaunchOptions {
        let start_url = self
            .start_url
            .clone()
            .or_else(|| flow.start_url.clone())
            .unwrap_or_else(|| BLANK_PAGE.to_string());

        let mut options = LaunchOptions::auto(start_url);
        options.headless |= self.headless;
        options.no_sandbox |= self.no_sandbox;
        options.chrome_path = self.chrome_path.clone();
        options
    }

    pub fn desktop_options(&self) -> DesktopOptions {
        let title = self.window_title.trim();
        DesktopOptions {
            window_title: (!title.is_empty()).then(|| title.to_string()),
            ..DesktopOptions::default()
        }
    }

    /// Installer folders need a desktop flow and record files a browser
    /// flow; any other pairing could never reach the items.
    pub fn check_surface(&self, flow: &Flow) -> anyhow::Result<()> {
        match (self.records, flow.surface) {
            (false, SurfaceKind::Desktop) | (true, SurfaceKind::Browser) => Ok(()),
            (false, SurfaceKind::Browser) => anyhow::bail!(
                "Flow '{}' drives a browser but {} is a folder of installers. \
                 Use a desktop flow, or pass --records for a record file",
                flow.name,
                self.source.display()
            ),
            (true, SurfaceKind::Desktop) => anyhow::bail!(
                "Flow '{}' drives installer windows but --records items have no installer path",
                flow.name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "wizard-autopilot",
            "run",
            "--flow",
            "flows/installer-wizard.json",
            "--source",
            "C:/Setup",
        ];
        argv.extend_from_slice(extra);

        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from(run_args(&[]));

        assert_eq!(config.mode, RunMode::Auto);
        assert!(!config.records);
        assert_eq!(config.between_items, Duration::from_secs(3));
        assert!(config.log_dir.ends_with("Automatic Setup/log"));
        assert!(config.summary_json.is_none());
    }

    #[test]
    fn test_mode_and_overrides() {
        let config = RunConfig::from(run_args(&[
            "--mode",
            "confirm-each",
            "--records",
            "--log-dir",
            "/tmp/logs",
            "--between-items-secs",
            "0",
            "--reboot",
        ]));

        assert_eq!(config.mode, RunMode::ConfirmEach);
        assert!(config.records);
        assert!(config.reboot);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.between_items, Duration::ZERO);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let argv = [
            "wizard-autopilot",
            "run",
            "--flow",
            "f.json",
            "--source",
            "s",
            "--mode",
            "turbo",
        ];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_surface_must_match_source() {
        let desktop = Flow::new("installer", vec![]).with_surface(SurfaceKind::Desktop);
        let browser = Flow::new("web", vec![]);

        let folder = RunConfig::from(run_args(&[]));
        assert!(folder.check_surface(&desktop).is_ok());
        let err = folder.check_surface(&browser).unwrap_err();
        assert!(err.to_string().contains("folder of installers"));

        let records = RunConfig::from(run_args(&["--records"]));
        assert!(records.check_surface(&browser).is_ok());
        assert!(records.check_surface(&desktop).is_err());
    }

    #[test]
    fn test_window_title_option() {
        let config = RunConfig::from(run_args(&[]));
        assert_eq!(config.desktop_options().window_title.as_deref(), Some("Setup"));

        let config = RunConfig::from(run_args(&["--window-title", ""]));
        assert!(config.desktop_options().window_title.is_none());
    }

    #[test]
    fn test_start_url_precedence() {
        let mut flow = Flow::new("web", vec![]);
        flow.start_url = Some("https://example.com/signup".to_string());

        let config = RunConfig::from(run_args(&["--headless"]));
        let options = config.launch_options(&flow);
        assert_eq!(options.start_url, "https://example.com/signup");
        assert!(options.headless);

        let config = RunConfig::from(run_args(&["--start-url", "http://localhost:8080"]));
        assert_eq!(
            config.launch_options(&flow).start_url,
            "http://localhost:8080"
        );

        let config = RunConfig::from(run_args(&[]));
        assert_eq!(
            config.launch_options(&Flow::new("x", vec![])).start_url,
            BLANK_PAGE
        );
    }
}
