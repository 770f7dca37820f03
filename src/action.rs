//! Action candidates
//!
//! One logical action ("press Next") usually has several concrete shapes on
//! screen: `Next >`, `&Next`, `Next`. A candidate set lists them in priority
//! order and dispatch executes the first one that is actually there.

use crate::error::StepError;
use crate::flow::{millis, Condition};
use crate::poll::{settle, wait_until};
use crate::source::Item;
use crate::surface::{Interaction, Selector, SurfaceDriver};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_detect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_detect_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_grace() -> Duration {
    Duration::from_millis(500)
}

/// Where typed text comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Literal(String),
    ItemId,
    /// A payload field of the current item
    Field(String),
}

impl TextSource {
    pub fn resolve(&self, item: &Item) -> Result<String, String> {
        match self {
            TextSource::Literal(value) => Ok(value.clone()),
            TextSource::ItemId => Ok(item.id.clone()),
            TextSource::Field(key) => item
                .field(key)
                .map(str::to_string)
                .ok_or_else(|| format!("item has no '{}' field", key)),
        }
    }
}

/// Effect of a candidate, before it is bound to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    Click,
    ScriptClick,
    TypeText { text: TextSource },
    PressKey { key: String },
    /// Pick a drop-down entry by value
    SelectOption { value: TextSource },
}

impl Effect {
    /// Bind to an item, producing the concrete interaction.
    pub fn resolve(&self, item: &Item) -> Result<Interaction, String> {
        Ok(match self {
            Effect::Click => Interaction::Click,
            Effect::ScriptClick => Interaction::ScriptClick,
            Effect::PressKey { key } => Interaction::PressKey(key.clone()),
            Effect::TypeText { text } => Interaction::TypeText(text.resolve(item)?),
            Effect::SelectOption { value } => Interaction::SelectOption(value.resolve(item)?),
        })
    }
}

/// One concrete way to perform a step's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub label: String,

    /// Detection: the candidate is usable when this is locatable
    pub target: Selector,

    pub effect: Effect,

    /// Alternate dispatch, tried once when `effect` errors or does not
    /// register
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Effect>,

    /// Checked once after the grace period; `None` trusts the effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<Condition>,
}

impl ActionCandidate {
    pub fn new(label: impl Into<String>, target: Selector, effect: Effect) -> Self {
        Self {
            label: label.into(),
            target,
            effect,
            fallback: None,
            confirm: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Effect) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_confirm(mut self, confirm: Condition) -> Self {
        self.confirm = Some(confirm);
        self
    }
}

/// Which candidate ran, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub candidate: String,
    pub used_fallback: bool,
    /// Detection polls before a candidate was found
    pub detect_attempts: u32,
}

/// Ordered alternatives for one logical action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCandidateSet {
    #[serde(default)]
    pub candidates: Vec<ActionCandidate>,

    #[serde(
        rename = "detect_timeout_ms",
        with = "millis",
        default = "default_detect_timeout"
    )]
    pub detect_timeout: Duration,

    #[serde(
        rename = "detect_interval_ms",
        with = "millis",
        default = "default_detect_interval"
    )]
    pub detect_interval: Duration,

    /// How long an effect gets to show up before `confirm` is checked
    #[serde(rename = "grace_ms", with = "millis", default = "default_grace")]
    pub grace: Duration,
}

impl Default for ActionCandidateSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ActionCandidateSet {
    pub fn new(candidates: Vec<ActionCandidate>) -> Self {
        Self {
            candidates,
            detect_timeout: default_detect_timeout(),
            detect_interval: default_detect_interval(),
            grace: default_grace(),
        }
    }

    pub fn with_detect_timeout(mut self, timeout: Duration, interval: Duration) -> Self {
        self.detect_timeout = timeout;
        self.detect_interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub(crate) fn validate(&self, step: &str) -> anyhow::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if self.detect_timeout.is_zero() {
            anyhow::bail!("Step '{}' has a zero detection timeout", step);
        }
        for (i, candidate) in self.candidates.iter().enumerate() {
            if candidate.label.trim().is_empty() {
                anyhow::bail!("Step '{}' candidate {} has an empty label", step, i + 1);
            }
            if candidate.target.is_empty() {
                anyhow::bail!(
                    "Step '{}' candidate '{}' has an empty selector",
                    step,
                    candidate.label
                );
            }
        }
        Ok(())
    }

    /// Find the first detectable candidate and run it.
    ///
    /// Returns `Ok(None)` for an empty set. `baseline` is the location token
    /// captured before dispatch, for `location_changed` confirmations.
    pub async fn dispatch<S: SurfaceDriver>(
        &self,
        step: &str,
        surface: &S,
        item: &Item,
        baseline: Option<&str>,
    ) -> Result<Option<Dispatched>, StepError> {
        if self.is_empty() {
            return Ok(None);
        }

        let detected = wait_until(
            move || async move {
                for (index, candidate) in self.candidates.iter().enumerate() {
                    if let Ok(Some(element)) = surface.locate(&candidate.target).await {
                        return Some((index, element));
                    }
                }
                None
            },
            self.detect_timeout,
            self.detect_interval,
        )
        .await
        .map_err(|_| StepError::ActionNotFound {
            step: step.to_string(),
            tried: self.candidates.iter().map(|c| c.label.clone()).collect(),
        })?;

        let (index, element) = detected.value;
        let candidate = &self.candidates[index];
        let dispatch_error = |reason: String| StepError::ActionDispatch {
            step: step.to_string(),
            candidate: candidate.label.clone(),
            reason,
        };

        log::debug!(
            "Step {}: candidate '{}' detected after {} poll(s)",
            step,
            candidate.label,
            detected.attempts
        );

        let primary = candidate.effect.resolve(item).map_err(&dispatch_error)?;
        let first_reason = match self
            .attempt(surface, &element, &primary, candidate, baseline)
            .await
        {
            Ok(()) => {
                return Ok(Some(Dispatched {
                    candidate: candidate.label.clone(),
                    used_fallback: false,
                    detect_attempts: detected.attempts,
                }))
            }
            Err(reason) => reason,
        };

        let Some(fallback) = &candidate.fallback else {
            return Err(dispatch_error(first_reason));
        };

        log::warn!(
            "Step {}: {} on '{}' did not register ({}), trying fallback",
            step,
            primary,
            candidate.label,
            first_reason
        );

        let alternate = fallback.resolve(item).map_err(&dispatch_error)?;
        self.attempt(surface, &element, &alternate, candidate, baseline)
            .await
            .map_err(|reason| {
                dispatch_error(format!("{}; fallback {}: {}", first_reason, alternate, reason))
            })?;

        Ok(Some(Dispatched {
            candidate: candidate.label.clone(),
            used_fallback: true,
            detect_attempts: detected.attempts,
        }))
    }

    async fn attempt<S: SurfaceDriver>(
        &self,
        surface: &S,
        element: &S::Element,
        interaction: &Interaction,
        candidate: &ActionCandidate,
        baseline: Option<&str>,
    ) -> Result<(), String> {
        surface
            .act(element, interaction)
            .await
            .map_err(|e| format!("{} failed: {}", interaction, e))?;

        if let Some(confirm) = &candidate.confirm {
            settle(self.grace).await;
            if !confirm.holds(surface, baseline).await {
                return Err(format!(
                    "{} had no visible effect after {}ms",
                    interaction,
                    self.grace.as_millis()
                ));
            }
        }

        Ok(())
    }
}
