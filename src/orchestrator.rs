//! Run orchestration
//!
//! Owns the item queue and the run mode, and drives the wizard runner once per
//! item. Exactly one item is in flight at any time.

use crate::error::RunError;
use crate::flow::Flow;
use crate::operator::{Decision, OperatorChannel};
use crate::outcome::{LogSink, MemoryLogSink, OutcomeTracker, RunResult};
use crate::poll::settle;
use crate::runner::WizardRunner;
use crate::source::{Item, ItemSource};
use crate::surface::{SurfaceDriver, SurfaceProvider};
use log::Level;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// How items are fed to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Run every item without asking
    Auto,
    /// Ask the operator before each item
    ConfirmEach,
    /// Re-list the source before each item until nothing new shows up
    Watch,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Auto => f.write_str("auto"),
            RunMode::ConfirmEach => f.write_str("confirm-each"),
            RunMode::Watch => f.write_str("watch"),
        }
    }
}

/// Items to process, and optionally where their source currently lives.
pub struct ItemQueue {
    source: Box<dyn ItemSource>,
    location: Option<watch::Receiver<PathBuf>>,
}

impl ItemQueue {
    pub fn new(source: Box<dyn ItemSource>) -> Self {
        Self {
            source,
            location: None,
        }
    }

    /// Follow location changes published by an observer. Only read between
    /// items.
    pub fn follow(mut self, location: watch::Receiver<PathBuf>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    fn list(&self) -> Result<Vec<Item>, RunError> {
        self.source.list().map_err(RunError::Source)
    }

    fn sync_location(&mut self) {
        let Some(location) = &mut self.location else {
            return;
        };
        if location.has_changed().unwrap_or(false) {
            let moved = location.borrow_and_update().clone();
            self.source.relocate(moved);
        }
    }
}

/// Drives a flow over every item of a queue.
pub struct Orchestrator<P, O> {
    provider: P,
    operator: O,
    between_items: Duration,
    sink: Option<Box<dyn LogSink>>,
}

impl<P, O> Orchestrator<P, O>
where
    P: SurfaceProvider,
    O: OperatorChannel,
{
    pub fn new(provider: P, operator: O) -> Self {
        Self {
            provider,
            operator,
            between_items: Duration::ZERO,
            sink: None,
        }
    }

    /// Countdown after each item before the next one starts.
    pub fn with_between_items(mut self, delay: Duration) -> Self {
        self.between_items = delay;
        self
    }

    /// Sink for the next run's log. Without one the log is kept in memory.
    pub fn with_log_sink(mut self, sink: Box<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn operator_mut(&mut self) -> &mut O {
        &mut self.operator
    }

    /// Process the queue with `flow`.
    ///
    /// Returns the tracker of a completed run. An operator abort, or a
    /// failed operator channel, returns the tracker as it stood inside
    /// [`RunError::OperatorAbort`] or [`RunError::Operator`].
    pub async fn run(
        &mut self,
        mut queue: ItemQueue,
        flow: &Flow,
        mode: RunMode,
    ) -> Result<OutcomeTracker, RunError> {
        let sink = self
            .sink
            .take()
            .unwrap_or_else(|| Box::new(MemoryLogSink::new()) as Box<dyn LogSink>);
        let mut tracker = OutcomeTracker::new(sink);
        let runner = WizardRunner::new(flow);

        let mut backlog: VecDeque<Item> = queue.list()?.into();
        if backlog.is_empty() {
            log::info!("Nothing to do in {}", queue.describe());
            return Err(RunError::EmptySource {
                source_desc: queue.describe(),
            });
        }

        tracker.note(
            Level::Info,
            None,
            &format!(
                "run started: flow '{}', {} mode, {} item(s) from {}",
                flow.name,
                mode,
                backlog.len(),
                queue.describe()
            ),
            None,
        );

        let mut processed = 0usize;
        loop {
            if mode == RunMode::Watch && processed > 0 {
                queue.sync_location();
                backlog = match queue.list() {
                    Ok(items) => items
                        .into_iter()
                        .filter(|item| tracker.status(&item.id) == RunResult::Pending)
                        .collect(),
                    Err(e) => {
                        log::error!("{}", e);
                        tracker.note(Level::Error, None, "re-listing failed", Some(&e.to_string()));
                        break;
                    }
                };
            }

            let Some(item) = backlog.pop_front() else {
                break;
            };
            processed += 1;

            if mode == RunMode::ConfirmEach {
                let decision = match self.operator.decide(&item).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        log::error!("Operator channel failed before {}: {}", item.id, e);
                        tracker.note(
                            Level::Error,
                            Some(&item.id),
                            "operator channel failed",
                            Some(&e.to_string()),
                        );
                        return Err(RunError::Operator {
                            item: item.id,
                            source: e,
                            partial: Box::new(tracker),
                        });
                    }
                };
                match decision {
                    Decision::Continue => {}
                    Decision::Skip => {
                        log::info!("{}: skipped by operator", item.id);
                        if let Err(e) = tracker.record(&item.id, RunResult::Skipped) {
                            log::warn!("{}", e);
                        }
                        continue;
                    }
                    Decision::Abort => {
                        log::warn!("Run aborted by operator before {}", item.id);
                        tracker.note(Level::Warn, Some(&item.id), "run aborted by operator", None);
                        return Err(RunError::OperatorAbort {
                            item: item.id,
                            partial: Box::new(tracker),
                        });
                    }
                }
            }

            log::info!("Item {}: {}", processed, item.id);
            let result = self.process(&runner, &item, &mut tracker).await;
            if let Err(e) = tracker.record(&item.id, result) {
                log::warn!("{}", e);
            }

            if mode == RunMode::Watch || !backlog.is_empty() {
                settle(self.between_items).await;
            }
        }

        let counts = tracker.counts();
        tracker.note(
            Level::Info,
            None,
            &format!(
                "run finished: {} succeeded, {} skipped, {} failed",
                counts.succeeded, counts.skipped, counts.failed
            ),
            None,
        );
        Ok(tracker)
    }

    async fn process(
        &self,
        runner: &WizardRunner<'_>,
        item: &Item,
        tracker: &mut OutcomeTracker,
    ) -> RunResult {
        if let Err(e) = tracker.begin(&item.id) {
            log::warn!("{}", e);
        }

        let surface = match self.provider.acquire(item).await {
            Ok(surface) => surface,
            Err(e) => return RunResult::Failed(format!("surface unavailable: {}", e)),
        };

        let result = runner.run(item, &surface, tracker).await;

        if let Err(e) = surface.release().await {
            log::warn!("{}: failed to release surface: {}", item.id, e);
            tracker.note(
                Level::Warn,
                Some(&item.id),
                "surface release failed",
                Some(&e.to_string()),
            );
        }

        result
    }
}
