//! Wizard runner
//!
//! Drives one item through the steps of a flow. Each step waits for its
//! precondition, dispatches its action, optionally settles, then waits for its
//! postcondition. The first failing step ends the item.

use crate::error::{StepError, WaitPhase};
use crate::flow::{Flow, StepDefinition};
use crate::outcome::{OutcomeTracker, RunResult};
use crate::poll::{settle, wait_for};
use crate::source::Item;
use crate::surface::SurfaceDriver;
use log::Level;
use tokio::time::Instant;

/// Transient progress of one item through a flow.
#[derive(Debug, Clone)]
pub struct WizardState {
    step_index: usize,
    /// Polls spent by the most recent wait of the current step
    pub polls: u32,
    pub started: Instant,
    /// Location token captured just before the current step's action
    pub baseline: Option<String>,
}

impl WizardState {
    fn new() -> Self {
        Self {
            step_index: 0,
            polls: 0,
            started: Instant::now(),
            baseline: None,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Move to the next step. The index never goes back.
    fn advance(&mut self) {
        self.step_index += 1;
        self.polls = 0;
        self.baseline = None;
    }
}

/// Runs the steps of one flow against a surface.
pub struct WizardRunner<'f> {
    flow: &'f Flow,
}

impl<'f> WizardRunner<'f> {
    pub fn new(flow: &'f Flow) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &Flow {
        self.flow
    }

    /// Drive `item` through every step and turn the outcome into a terminal
    /// result. Step errors never escape; they become `Failed(reason)`.
    pub async fn run<S: SurfaceDriver>(
        &self,
        item: &Item,
        surface: &S,
        tracker: &mut OutcomeTracker,
    ) -> RunResult {
        let mut state = WizardState::new();

        match self.drive(item, surface, tracker, &mut state).await {
            Ok(()) => {
                log::info!(
                    "{}: all {} step(s) completed in {:.1}s",
                    item.id,
                    self.flow.steps.len(),
                    state.started.elapsed().as_secs_f64()
                );
                RunResult::Succeeded
            }
            Err(e) => {
                log::error!("{}: {}", item.id, e);
                RunResult::Failed(e.to_string())
            }
        }
    }

    async fn drive<S: SurfaceDriver>(
        &self,
        item: &Item,
        surface: &S,
        tracker: &mut OutcomeTracker,
        state: &mut WizardState,
    ) -> Result<(), StepError> {
        for step in &self.flow.steps {
            self.run_step(step, item, surface, tracker, state).await?;
            state.advance();
        }
        Ok(())
    }

    async fn run_step<S: SurfaceDriver>(
        &self,
        step: &StepDefinition,
        item: &Item,
        surface: &S,
        tracker: &mut OutcomeTracker,
        state: &mut WizardState,
    ) -> Result<(), StepError> {
        let position = state.step_index + 1;
        log::info!(
            "{}: step {}/{} '{}'",
            item.id,
            position,
            self.flow.steps.len(),
            step.name
        );
        tracker.note(
            Level::Debug,
            Some(&item.id),
            &format!("step '{}' started", step.name),
            None,
        );

        let ready = wait_for(
            move || step.precondition.holds(surface, None),
            step.timeout,
            step.interval,
        )
        .await;
        state.polls = match ready {
            Ok(satisfied) => satisfied.attempts,
            Err(timeout) => {
                tracker.note(
                    Level::Warn,
                    Some(&item.id),
                    &format!("step '{}' precondition not met", step.name),
                    Some(&timeout.to_string()),
                );
                return Err(StepError::StepTimeout {
                    step: step.name.clone(),
                    phase: WaitPhase::Precondition,
                });
            }
        };

        state.baseline = surface.current_location_token().await.ok();

        let dispatched = match step
            .actions
            .dispatch(&step.name, surface, item, state.baseline.as_deref())
            .await
        {
            Ok(dispatched) => dispatched,
            Err(e) => {
                tracker.note(
                    Level::Warn,
                    Some(&item.id),
                    &format!("step '{}' action failed", step.name),
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        };
        if let Some(dispatched) = dispatched {
            let how = if dispatched.used_fallback {
                "fallback"
            } else {
                "primary"
            };
            log::debug!(
                "{}: '{}' dispatched via {} ({} detection poll(s))",
                item.id,
                dispatched.candidate,
                how,
                dispatched.detect_attempts
            );
            tracker.note(
                Level::Info,
                Some(&item.id),
                &format!("step '{}' action '{}'", step.name, dispatched.candidate),
                dispatched.used_fallback.then_some("fallback used"),
            );
        }

        settle(step.settle).await;

        let baseline = state.baseline.as_deref();
        let done = wait_for(
            move || step.postcondition.holds(surface, baseline),
            step.timeout,
            step.interval,
        )
        .await;
        state.polls = match done {
            Ok(satisfied) => satisfied.attempts,
            Err(timeout) => {
                tracker.note(
                    Level::Warn,
                    Some(&item.id),
                    &format!("step '{}' postcondition not met", step.name),
                    Some(&timeout.to_string()),
                );
                return Err(StepError::StepTimeout {
                    step: step.name.clone(),
                    phase: WaitPhase::Postcondition,
                });
            }
        };

        tracker.note(
            Level::Debug,
            Some(&item.id),
            &format!("step '{}' completed", step.name),
            None,
        );
        Ok(())
    }
}
