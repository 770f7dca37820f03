//! Flow definitions
//!
//! A flow is the fixed, ordered list of steps every item goes through. Flows
//! are plain JSON documents loaded once at startup and shared read-only by
//! every item of the run.

use crate::action::ActionCandidateSet;
use crate::surface::{Selector, SurfaceDriver, SurfaceKind};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Durations are written as integer milliseconds in flow files.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn default_interval() -> Duration {
    Duration::from_millis(500)
}

/// Side-effect-free observation of the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    Present {
        selector: Selector,
    },
    Absent {
        selector: Selector,
    },
    /// The element is there and its value is not blank.
    HasValue {
        selector: Selector,
    },
    LocationStartsWith {
        prefix: String,
    },
    /// The location token differs from the one captured just before the
    /// step's action. Never holds before an action has been dispatched.
    LocationChanged,
    AnyOf {
        conditions: Vec<Condition>,
    },
    AllOf {
        conditions: Vec<Condition>,
    },
}

impl Condition {
    pub fn present(selector: Selector) -> Self {
        Condition::Present { selector }
    }

    pub fn absent(selector: Selector) -> Self {
        Condition::Absent { selector }
    }

    pub fn has_value(selector: Selector) -> Self {
        Condition::HasValue { selector }
    }

    /// Evaluate against the surface. `baseline` is the location token
    /// captured before the current step's action, if any.
    pub fn holds<'a, S: SurfaceDriver>(
        &'a self,
        surface: &'a S,
        baseline: Option<&'a str>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self {
                Condition::Always => true,
                Condition::Present { selector } => surface.is_present(selector).await,
                Condition::Absent { selector } => !surface.is_present(selector).await,
                Condition::HasValue { selector } => matches!(
                    surface.read_value(selector).await,
                    Ok(Some(value)) if !value.trim().is_empty()
                ),
                Condition::LocationStartsWith { prefix } => surface
                    .current_location_token()
                    .await
                    .map(|token| token.starts_with(prefix.as_str()))
                    .unwrap_or(false),
                Condition::LocationChanged => match baseline {
                    Some(before) => surface
                        .current_location_token()
                        .await
                        .map(|token| token != before)
                        .unwrap_or(false),
                    None => false,
                },
                Condition::AnyOf { conditions } => {
                    for condition in conditions {
                        if condition.holds(surface, baseline).await {
                            return true;
                        }
                    }
                    false
                }
                Condition::AllOf { conditions } => {
                    for condition in conditions {
                        if !condition.holds(surface, baseline).await {
                            return false;
                        }
                    }
                    true
                }
            }
        })
    }

    /// Every selector this condition observes, nested ones included.
    pub fn selectors(&self) -> Vec<&Selector> {
        match self {
            Condition::Present { selector }
            | Condition::Absent { selector }
            | Condition::HasValue { selector } => vec![selector],
            Condition::AnyOf { conditions } | Condition::AllOf { conditions } => {
                conditions.iter().flat_map(Condition::selectors).collect()
            }
            _ => Vec::new(),
        }
    }

    fn check(&self, location: &str) -> anyhow::Result<()> {
        match self {
            Condition::Present { selector }
            | Condition::Absent { selector }
            | Condition::HasValue { selector } => {
                if selector.is_empty() {
                    anyhow::bail!("{} has an empty selector", location);
                }
            }
            Condition::LocationStartsWith { prefix } if prefix.is_empty() => {
                anyhow::bail!("{} has an empty location prefix", location);
            }
            Condition::AnyOf { conditions } | Condition::AllOf { conditions } => {
                if conditions.is_empty() {
                    anyhow::bail!("{} combines no conditions", location);
                }
                for condition in conditions {
                    condition.check(location)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// One stage of a flow: wait, act, wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Used in logs and failure reasons
    pub name: String,

    #[serde(default)]
    pub precondition: Condition,

    /// Empty for steps that only wait (e.g. for an external solver)
    #[serde(default)]
    pub actions: ActionCandidateSet,

    #[serde(default)]
    pub postcondition: Condition,

    /// Budget for each of the two waits
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    #[serde(rename = "interval_ms", with = "millis", default = "default_interval")]
    pub interval: Duration,

    /// Fixed delay between the action and the postcondition wait
    #[serde(rename = "settle_ms", with = "millis", default)]
    pub settle: Duration,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            precondition: Condition::Always,
            actions: ActionCandidateSet::default(),
            postcondition: Condition::Always,
            timeout,
            interval: default_interval(),
            settle: Duration::ZERO,
        }
    }

    pub fn with_precondition(mut self, condition: Condition) -> Self {
        self.precondition = condition;
        self
    }

    pub fn with_actions(mut self, actions: ActionCandidateSet) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_postcondition(mut self, condition: Condition) -> Self {
        self.postcondition = condition;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Selectors of the step's conditions and action candidates.
    pub fn selectors(&self) -> Vec<&Selector> {
        let mut selectors = self.precondition.selectors();
        for candidate in &self.actions.candidates {
            selectors.push(&candidate.target);
            if let Some(confirm) = &candidate.confirm {
                selectors.extend(confirm.selectors());
            }
        }
        selectors.extend(self.postcondition.selectors());
        selectors
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Unique flow name (lowercase-hyphenated)
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Where a browser surface starts, for web flows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,

    #[serde(default)]
    pub surface: SurfaceKind,

    pub steps: Vec<StepDefinition>,
}

impl Flow {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            start_url: None,
            surface: SurfaceKind::Browser,
            steps,
        }
    }

    pub fn with_surface(mut self, surface: SurfaceKind) -> Self {
        self.surface = surface;
        self
    }

    /// Load a flow from a JSON file
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let flow: Flow = serde_json::from_str(json)?;
        Ok(flow)
    }

    /// Save this flow to a JSON file
    pub async fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Structural checks, run once before any item is touched
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Flow name cannot be empty");
        }

        if self.steps.is_empty() {
            anyhow::bail!("Flow must contain at least one step");
        }

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            let position = i + 1;

            if step.name.trim().is_empty() {
                anyhow::bail!("Step {} has an empty name", position);
            }
            if !seen.insert(step.name.as_str()) {
                anyhow::bail!("Step {} reuses the name '{}'", position, step.name);
            }
            if step.timeout.is_zero() {
                anyhow::bail!("Step '{}' has a zero timeout", step.name);
            }
            if step.interval.is_zero() {
                anyhow::bail!("Step '{}' has a zero poll interval", step.name);
            }

            step.precondition
                .check(&format!("Step '{}' precondition", step.name))?;
            step.postcondition
                .check(&format!("Step '{}' postcondition", step.name))?;
            step.actions.validate(&step.name)?;

            if self.surface == SurfaceKind::Desktop {
                if let Some(selector) = step.selectors().into_iter().find(|s| !s.is_caption()) {
                    anyhow::bail!(
                        "Step '{}' uses {} but desktop flows only find elements by caption",
                        step.name,
                        selector
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionCandidate, Effect};

    fn one_step_flow() -> Flow {
        Flow::new(
            "test",
            vec![StepDefinition::new("welcome", Duration::from_secs(5))
                .with_precondition(Condition::present(Selector::caption("Next >")))
                .with_actions(ActionCandidateSet::new(vec![ActionCandidate::new(
                    "next",
                    Selector::caption("Next >"),
                    Effect::Click,
                )]))],
        )
    }

    #[test]
    fn test_flow_validation() {
        let mut flow = one_step_flow();
        assert!(flow.validate().is_ok());

        flow.steps.push(StepDefinition::new("welcome", Duration::from_secs(1)));
        assert!(flow.validate().is_err(), "duplicate step names");

        flow.steps.pop();
        flow.steps[0].timeout = Duration::ZERO;
        assert!(flow.validate().is_err(), "zero timeout");

        let empty = Flow::new("empty", vec![]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_nested_condition_validation() {
        let mut flow = one_step_flow();
        flow.steps[0].postcondition = Condition::AnyOf {
            conditions: vec![
                Condition::LocationChanged,
                Condition::absent(Selector::css("")),
            ],
        };
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("empty selector"));

        flow.steps[0].postcondition = Condition::AllOf { conditions: vec![] };
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_desktop_flow_needs_captions() {
        let flow = one_step_flow().with_surface(SurfaceKind::Desktop);
        assert!(flow.validate().is_ok());

        let mut flow = flow;
        flow.steps[0].postcondition = Condition::AnyOf {
            conditions: vec![
                Condition::present(Selector::caption("Finish")),
                Condition::has_value(Selector::css("#serial")),
            ],
        };
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("css:#serial"));
    }

    #[test]
    fn test_json_defaults() {
        let flow = Flow::from_json(
            r##"{
                "name": "wait-only",
                "steps": [
                    {
                        "name": "solver",
                        "postcondition": {"kind": "present", "selector": {"css": "#done"}},
                        "timeout_ms": 30000
                    }
                ]
            }"##,
        )
        .unwrap();

        let step = &flow.steps[0];
        assert_eq!(step.precondition, Condition::Always);
        assert!(step.actions.is_empty());
        assert_eq!(step.interval, Duration::from_millis(500));
        assert_eq!(step.settle, Duration::ZERO);
        assert_eq!(step.timeout, Duration::from_secs(30));
        assert_eq!(flow.surface, SurfaceKind::Browser);
        assert!(flow.validate().is_ok());
    }
}
