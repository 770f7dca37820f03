//! Whole runs over several items: ordering, operator decisions, empty
//! sources and per-item isolation.


use scripted_surface::{Scripted, ScriptedProvider};
use std::time::Duration;
use wizard_autopilot::{
    ActionCandidate, ActionCandidateSet, Condition, DirectorySource, Effect, FixedSource, Flow,
    Item, ItemQueue, LineOperator, MemoryLogSink, Orchestrator, RunError, RunMode, RunResult,
    Selector, StepDefinition,
};

type TestOperator = LineOperator<&'static [u8], Vec<u8>>;

fn next_button() -> Selector {
    Selector::caption("Next >")
}

/// One step: wait for Next, click it, done.
fn click_next_flow() -> Flow {
    Flow::new(
        "click-next",
        vec![StepDefinition::new("welcome", Duration::from_secs(5))
            .with_precondition(Condition::present(next_button()))
            .with_actions(ActionCandidateSet::new(vec![ActionCandidate::new(
                "next",
                next_button(),
                Effect::Click,
            )]))],
    )
}

fn queue(ids: &[&str]) -> ItemQueue {
    let items = ids.iter().map(|id| Item::new(*id)).collect();
    ItemQueue::new(Box::new(FixedSource::new(items)))
}

fn orchestrator(
    scripted: &Scripted,
    operator_input: &'static str,
) -> Orchestrator<ScriptedProvider, TestOperator> {
    Orchestrator::new(
        scripted.provider(),
        LineOperator::new(operator_input.as_bytes(), Vec::new()),
    )
}

fn results(pairs: &[(&str, RunResult)]) -> Vec<(String, RunResult)> {
    pairs
        .iter()
        .map(|(id, result)| (id.to_string(), result.clone()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_auto_mode_all_succeed() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "");

    let tracker = orchestrator
        .run(queue(&["A", "B", "C"]), &click_next_flow(), RunMode::Auto)
        .await
        .unwrap();

    assert_eq!(
        tracker.summary(),
        results(&[
            ("A", RunResult::Succeeded),
            ("B", RunResult::Succeeded),
            ("C", RunResult::Succeeded),
        ])
    );
    assert_eq!(scripted.acquired(), vec!["A", "B", "C"]);
    assert_eq!(scripted.released(), 3);
    assert!(!tracker.any_failed());
}

#[tokio::test(start_paused = true)]
async fn test_items_run_in_sorted_order() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "");

    let tracker = orchestrator
        .run(
            queue(&["zoom.exe", "Agent.msi", "b-setup.exe"]),
            &click_next_flow(),
            RunMode::Auto,
        )
        .await
        .unwrap();

    let order: Vec<String> = tracker.summary().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec!["Agent.msi", "b-setup.exe", "zoom.exe"]);
    assert_eq!(scripted.acquired(), order);
}

#[tokio::test(start_paused = true)]
async fn test_installer_paths_reach_the_provider() {
    let dir = std::env::temp_dir().join("wizard-autopilot-installer-paths");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    for name in ["zoom.exe", "Agent.msi", "readme.txt"] {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "");
    let queue = ItemQueue::new(Box::new(DirectorySource::new(&dir)));

    let tracker = orchestrator
        .run(queue, &click_next_flow(), RunMode::Auto)
        .await
        .unwrap();

    assert_eq!(tracker.summary().len(), 2);
    assert_eq!(
        scripted.launched(),
        vec![
            dir.join("Agent.msi").to_string_lossy().to_string(),
            dir.join("zoom.exe").to_string_lossy().to_string(),
        ]
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(start_paused = true)]
async fn test_confirm_each_skip() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "n\ns\nnext\n");

    let tracker = orchestrator
        .run(queue(&["A", "B", "C"]), &click_next_flow(), RunMode::ConfirmEach)
        .await
        .unwrap();

    assert_eq!(
        tracker.summary(),
        results(&[
            ("A", RunResult::Succeeded),
            ("B", RunResult::Skipped),
            ("C", RunResult::Succeeded),
        ])
    );
    // a skipped item never gets a surface
    assert_eq!(scripted.acquired(), vec!["A", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_confirm_each_abort() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "y\nq\n");

    let err = orchestrator
        .run(queue(&["A", "B"]), &click_next_flow(), RunMode::ConfirmEach)
        .await
        .unwrap_err();

    match err {
        RunError::OperatorAbort { item, partial } => {
            assert_eq!(item, "B");
            assert_eq!(partial.summary(), results(&[("A", RunResult::Succeeded)]));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(scripted.acquired(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_input_does_not_consume_an_item() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "huh\n\nc\ns\n");

    let tracker = orchestrator
        .run(queue(&["A", "B"]), &click_next_flow(), RunMode::ConfirmEach)
        .await
        .unwrap();

    assert_eq!(
        tracker.summary(),
        results(&[("A", RunResult::Succeeded), ("B", RunResult::Skipped)])
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_operator_input_aborts() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "n\n");

    let err = orchestrator
        .run(queue(&["A", "B", "C"]), &click_next_flow(), RunMode::ConfirmEach)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::OperatorAbort { ref item, .. } if item == "B"));
}

#[tokio::test(start_paused = true)]
async fn test_broken_operator_input_keeps_partial_results() {
    let scripted = Scripted::new().with_present(next_button());
    // the second answer is not valid UTF-8, so reading it fails
    let input: &'static [u8] = b"y\n\xff\xfe\n";
    let mut orchestrator =
        Orchestrator::new(scripted.provider(), LineOperator::new(input, Vec::new()));

    let err = orchestrator
        .run(queue(&["A", "B", "C"]), &click_next_flow(), RunMode::ConfirmEach)
        .await
        .unwrap_err();

    match err {
        RunError::Operator { item, partial, .. } => {
            assert_eq!(item, "B");
            assert_eq!(partial.summary(), results(&[("A", RunResult::Succeeded)]));
        }
        other => panic!("expected operator failure, got {:?}", other),
    }
    assert_eq!(scripted.acquired(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_source_runs_nothing() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "");

    let err = orchestrator
        .run(queue(&[]), &click_next_flow(), RunMode::Auto)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::EmptySource { .. }));
    assert!(scripted.acquired().is_empty());
    assert_eq!(scripted.lookups(&next_button()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_isolated_to_its_item() {
    // "B" never gets a surface; "A" and "C" are unaffected
    let scripted = Scripted::new()
        .with_present(next_button())
        .unavailable_for("B");
    let mut orchestrator = orchestrator(&scripted, "");

    let tracker = orchestrator
        .run(queue(&["A", "B", "C"]), &click_next_flow(), RunMode::Auto)
        .await
        .unwrap();

    let summary = tracker.summary();
    assert_eq!(summary[0].1, RunResult::Succeeded);
    match &summary[1].1 {
        RunResult::Failed(reason) => assert!(reason.starts_with("surface unavailable")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(summary[2].1, RunResult::Succeeded);
    assert_eq!(tracker.counts().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_step_failure_does_not_stop_the_run() {
    // Next is never shown, so every item times out at its precondition
    let scripted = Scripted::new();
    let mut orchestrator = orchestrator(&scripted, "");

    let tracker = orchestrator
        .run(queue(&["A", "B"]), &click_next_flow(), RunMode::Auto)
        .await
        .unwrap();

    let expected = RunResult::Failed("precondition timeout at step welcome".to_string());
    assert_eq!(
        tracker.summary(),
        results(&[("A", expected.clone()), ("B", expected)])
    );
    assert_eq!(scripted.released(), 2);
    assert!(scripted.acted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inter_item_delay() {
    let scripted = Scripted::new().with_present(next_button());
    let mut orchestrator = orchestrator(&scripted, "").with_between_items(Duration::from_secs(3));

    let start = tokio::time::Instant::now();
    orchestrator
        .run(queue(&["A", "B", "C"]), &click_next_flow(), RunMode::Auto)
        .await
        .unwrap();

    // two countdowns, none after the last item
    assert_eq!(start.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_run_log_records_transitions() {
    let scripted = Scripted::new().with_present(next_button());
    let sink = MemoryLogSink::new();
    let mut orchestrator = orchestrator(&scripted, "").with_log_sink(Box::new(sink.clone()));

    let tracker = orchestrator
        .run(queue(&["A"]), &click_next_flow(), RunMode::Auto)
        .await
        .unwrap();
    assert_eq!(tracker.log_path(), None);

    let messages = sink.messages();
    assert!(messages[0].starts_with("run started: flow 'click-next'"));
    assert!(messages.contains(&"[A] started".to_string()));
    assert!(messages.contains(&"[A] step 'welcome' action 'next'".to_string()));
    assert!(messages.contains(&"[A] succeeded".to_string()));
    assert!(messages
        .last()
        .unwrap()
        .starts_with("run finished: 1 succeeded"));
}
