use anyhow::Context;
use clap::Parser;
use wizard_autopilot::config::{Cli, Command, RunConfig};
use wizard_autopilot::{
    spawn_location_observer, ChromeProvider, DirectorySource, FileLogSink, Flow, ItemQueue,
    ItemSource, LineOperator, LogSink, Orchestrator, OutcomeTracker, PostRun, RecordFileSource,
    RunError, RunMode, SurfaceKind, SurfaceProvider,
};

const EXIT_OK: i32 = 0;
const EXIT_STARTUP: i32 = 1;
const EXIT_ITEMS_FAILED: i32 = 2;
const EXIT_ABORTED: i32 = 3;

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Validate { flow } => validate(&flow).await,
        Command::Run(args) => run(RunConfig::from(args)).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            EXIT_STARTUP
        }
    };
    std::process::exit(code);
}

async fn load_flow(path: &std::path::Path) -> anyhow::Result<Flow> {
    let flow = Flow::from_file(path)
        .await
        .with_context(|| format!("Failed to load flow {}", path.display()))?;
    flow.validate()
        .with_context(|| format!("Invalid flow {}", path.display()))?;
    Ok(flow)
}

async fn validate(path: &std::path::Path) -> anyhow::Result<i32> {
    let flow = load_flow(path).await?;
    println!("Flow '{}' is valid ({} steps)", flow.name, flow.steps.len());
    for (i, step) in flow.steps.iter().enumerate() {
        println!(
            "  {}. {} ({} candidate(s), timeout {}ms)",
            i + 1,
            step.name,
            step.actions.candidates.len(),
            step.timeout.as_millis()
        );
    }
    Ok(EXIT_OK)
}

async fn run(config: RunConfig) -> anyhow::Result<i32> {
    let flow = load_flow(&config.flow_path).await?;
    config.check_surface(&flow)?;

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;
    let sink = FileLogSink::create(&config.log_dir).context("Failed to create run log")?;

    let source: Box<dyn ItemSource> = if config.records {
        Box::new(RecordFileSource::new(&config.source))
    } else {
        Box::new(DirectorySource::new(&config.source))
    };

    let mut queue = ItemQueue::new(source);
    let observer = if config.mode == RunMode::Watch {
        let (handle, location) = spawn_location_observer(config.source.clone(), config.watch_every);
        queue = queue.follow(location);
        Some(handle)
    } else {
        None
    };

    log::info!(
        "Running {} flow '{}' in {} mode over {}",
        flow.surface,
        flow.name,
        config.mode,
        queue.describe()
    );

    let code = match flow.surface {
        SurfaceKind::Browser => {
            let provider = ChromeProvider::new(config.launch_options(&flow));
            drive(provider, queue, &flow, &config, Box::new(sink)).await
        }
        SurfaceKind::Desktop => run_desktop(queue, &flow, &config, Box::new(sink)).await,
    };

    if let Some(handle) = observer {
        handle.abort();
    }
    code
}

#[cfg(windows)]
async fn run_desktop(
    queue: ItemQueue,
    flow: &Flow,
    config: &RunConfig,
    sink: Box<dyn LogSink>,
) -> anyhow::Result<i32> {
    let provider = wizard_autopilot::surface::DesktopProvider::new(config.desktop_options())?;
    drive(provider, queue, flow, config, sink).await
}

#[cfg(not(windows))]
async fn run_desktop(
    _queue: ItemQueue,
    flow: &Flow,
    _config: &RunConfig,
    _sink: Box<dyn LogSink>,
) -> anyhow::Result<i32> {
    anyhow::bail!(
        "Flow '{}' drives installer windows, which is only supported on Windows",
        flow.name
    )
}

/// Run the queue through `provider`'s surfaces, then report and wrap up.
async fn drive<P: SurfaceProvider>(
    provider: P,
    queue: ItemQueue,
    flow: &Flow,
    config: &RunConfig,
    sink: Box<dyn LogSink>,
) -> anyhow::Result<i32> {
    let mut orchestrator = Orchestrator::new(provider, LineOperator::stdio())
        .with_between_items(config.between_items)
        .with_log_sink(sink);

    let (tracker, code) = match orchestrator.run(queue, flow, config.mode).await {
        Ok(tracker) => {
            let code = if tracker.any_failed() {
                EXIT_ITEMS_FAILED
            } else {
                EXIT_OK
            };
            (tracker, code)
        }
        Err(RunError::EmptySource { source_desc }) => {
            println!("No items found in {}", source_desc);
            return Ok(EXIT_OK);
        }
        Err(RunError::OperatorAbort { item, partial }) => {
            println!("Aborted before {}", item);
            (*partial, EXIT_ABORTED)
        }
        Err(RunError::Operator {
            item,
            source,
            partial,
        }) => {
            log::error!("Operator input failed: {}", source);
            println!("Stopped before {}: operator input failed ({})", item, source);
            (*partial, EXIT_ABORTED)
        }
        Err(e) => anyhow::bail!("{}", e),
    };

    report(&tracker, config).await?;

    let mut post = PostRun::new(config.notify, config.reboot);
    post.notify(&mut tokio::io::stdout()).await?;
    post.reboot(orchestrator.operator_mut()).await?;

    Ok(code)
}

async fn report(tracker: &OutcomeTracker, config: &RunConfig) -> anyhow::Result<()> {
    println!();
    print!("{}", tracker.summary_table());

    if tracker.any_failed() {
        if let Some(path) = tracker.log_path() {
            println!("Details in {}", path.display());
        }
    }

    if let Some(path) = &config.summary_json {
        let json = serde_json::to_string_pretty(&tracker.summary_json())?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    Ok(())
}
