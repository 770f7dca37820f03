//! The automated surface: whatever renders the wizard or form being driven.
//!
//! The engine only ever talks to a surface through [`SurfaceDriver`], so
//! predicates stay pure observations (`is_present`, `read_value`,
//! `current_location_token`) and every effect goes through `act`.

pub mod chrome;
pub mod desktop;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::source::Item;

pub use chrome::{ChromeProvider, ChromeSurface, LaunchOptions};
#[cfg(windows)]
pub use desktop::{DesktopProvider, DesktopSurface};
pub use desktop::{installer_command, DesktopOptions};

/// What a flow drives: a web page or a native installer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    #[default]
    Browser,
    Desktop,
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceKind::Browser => f.write_str("browser"),
            SurfaceKind::Desktop => f.write_str("desktop"),
        }
    }
}

/// How to find one element on a surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Css(String),
    Xpath(String),
    /// A button identified by its visible caption, e.g. `"Next >"`.
    Caption(String),
}

impl Selector {
    pub fn css(value: impl Into<String>) -> Self {
        Selector::Css(value.into())
    }

    pub fn caption(value: impl Into<String>) -> Self {
        Selector::Caption(value.into())
    }

    /// The raw selector text, whatever its kind.
    pub fn value(&self) -> &str {
        match self {
            Selector::Css(v) | Selector::Xpath(v) | Selector::Caption(v) => v,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value().trim().is_empty()
    }

    pub fn is_caption(&self) -> bool {
        matches!(self, Selector::Caption(_))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(v) => write!(f, "css:{}", v),
            Selector::Xpath(v) => write!(f, "xpath:{}", v),
            Selector::Caption(v) => write!(f, "caption:{}", v),
        }
    }
}

/// A concrete effect applied to a located element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Native click through the surface's input pipeline.
    Click,
    /// Click dispatched by script on the element itself. The usual fallback
    /// when a native click does not register.
    ScriptClick,
    TypeText(String),
    PressKey(String),
    /// Choose an entry of a drop-down by its value.
    SelectOption(String),
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::Click => f.write_str("click"),
            Interaction::ScriptClick => f.write_str("script click"),
            // typed text may be a credential
            Interaction::TypeText(_) => f.write_str("type text"),
            Interaction::PressKey(key) => write!(f, "press {}", key),
            Interaction::SelectOption(value) => write!(f, "select '{}'", value),
        }
    }
}

/// Capability set the engine needs from a surface.
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    type Element: Send + Sync;

    /// Look up an element. `Ok(None)` means "not there (yet)".
    async fn locate(&self, selector: &Selector) -> Result<Option<Self::Element>>;

    /// Presence check used by predicates. Driver faults read as absent.
    async fn is_present(&self, selector: &Selector) -> bool {
        matches!(self.locate(selector).await, Ok(Some(_)))
    }

    async fn act(&self, element: &Self::Element, interaction: &Interaction) -> Result<()>;

    /// Current value of an input-like element (text box, hidden response
    /// field). `Ok(None)` when the element is not there.
    async fn read_value(&self, selector: &Selector) -> Result<Option<String>>;

    /// Opaque token identifying where the surface currently is (a URL, a
    /// window title).
    async fn current_location_token(&self) -> Result<String>;

    /// Tear the surface down. Called once per item, after its outcome is
    /// known.
    async fn release(self) -> Result<()>;
}

/// Hands out a fresh surface for each item.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    type Surface: SurfaceDriver;

    async fn acquire(&self, item: &Item) -> Result<Self::Surface>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_serde_shape() {
        let sel: Selector = serde_json::from_str(r#"{"caption": "Next >"}"#).unwrap();
        assert_eq!(sel, Selector::caption("Next >"));
        assert_eq!(sel.to_string(), "caption:Next >");

        let sel: Selector = serde_json::from_str(r##"{"css": "#email"}"##).unwrap();
        assert_eq!(sel.value(), "#email");
        assert!(!sel.is_empty());
        assert!(Selector::css("  ").is_empty());
    }

    #[test]
    fn typed_text_is_not_displayed() {
        let shown = Interaction::TypeText("hunter2".to_string()).to_string();
        assert!(!shown.contains("hunter2"));
        assert_eq!(Interaction::SelectOption("7".into()).to_string(), "select '7'");
    }
}
