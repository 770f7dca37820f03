//! The bundled flow files load and pass validation.

use std::path::Path;
use wizard_autopilot::{Condition, Effect, Flow, Selector, SurfaceKind, TextSource};

async fn load(name: &str) -> Flow {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("flows").join(name);
    let flow = Flow::from_file(&path)
        .await
        .unwrap_or_else(|e| panic!("failed to load {}: {:#}", name, e));
    flow.validate()
        .unwrap_or_else(|e| panic!("{} is invalid: {:#}", name, e));
    flow
}

#[tokio::test]
async fn test_installer_wizard_flow() {
    let flow = load("installer-wizard.json").await;

    let names: Vec<&str> = flow.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["welcome", "license", "install", "finish"]);
    assert!(flow.start_url.is_none());
    assert_eq!(flow.surface, SurfaceKind::Desktop);
    assert!(flow
        .steps
        .iter()
        .flat_map(|step| step.selectors())
        .all(Selector::is_caption));

    let welcome = &flow.steps[0];
    let labels: Vec<&str> = welcome
        .actions
        .candidates
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(labels, vec!["Next >", "&Next >", "Next"]);
    assert!(welcome
        .actions
        .candidates
        .iter()
        .all(|c| c.fallback == Some(Effect::ScriptClick)));
}

#[tokio::test]
async fn test_signup_form_flow() {
    let flow = load("signup-form.json").await;

    assert!(flow.start_url.as_deref().unwrap().starts_with("https://"));
    assert_eq!(flow.surface, SurfaceKind::Browser);

    let captcha = flow.steps.iter().find(|s| s.name == "captcha").unwrap();
    assert!(captcha.actions.is_empty(), "captcha step only waits");
    assert_eq!(
        captcha.postcondition,
        Condition::has_value(Selector::css("textarea[name='g-recaptcha-response']"))
    );

    let month = flow.steps.iter().find(|s| s.name == "birth-month").unwrap();
    assert!(matches!(
        month.actions.candidates[0].effect,
        Effect::SelectOption { .. }
    ));
    let names: Vec<&str> = flow.steps.iter().map(|s| s.name.as_str()).collect();
    let profile = names.iter().position(|n| *n == "profile").unwrap();
    assert_eq!(
        &names[profile..profile + 6],
        &["profile", "birth-month", "birth-day", "birth-year", "gender", "profile-next"]
    );

    let password = flow.steps.iter().find(|s| s.name == "password").unwrap();
    assert_eq!(
        password.actions.candidates[0].effect,
        Effect::TypeText {
            text: TextSource::Field("password".to_string())
        }
    );
    assert_eq!(
        password.precondition,
        Condition::present(Selector::css("input[type='password']"))
    );
}

#[tokio::test]
async fn test_saved_flow_loads_back() {
    let flow = load("installer-wizard.json").await;
    let path = std::env::temp_dir().join("wizard-autopilot-saved-flow.json");

    flow.to_file(&path).await.unwrap();
    let reloaded = Flow::from_file(&path).await.unwrap();
    reloaded.validate().unwrap();

    assert_eq!(reloaded.name, flow.name);
    assert_eq!(reloaded.steps.len(), flow.steps.len());
    assert_eq!(reloaded.steps[2].timeout, flow.steps[2].timeout);
    assert_eq!(reloaded.steps[2].actions, flow.steps[2].actions);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_missing_flow_file() {
    let result = Flow::from_file(Path::new("flows/does-not-exist.json")).await;
    assert!(result.is_err());
}
