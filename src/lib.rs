pub mod action;
pub mod config;
pub mod error;
pub mod flow;
pub mod operator;
pub mod orchestrator;
pub mod outcome;
pub mod poll;
pub mod post_run;
pub mod runner;
pub mod source;
pub mod surface;

//  Re-export commonly used items
pub use action::{ActionCandidate, ActionCandidateSet, Dispatched, Effect, TextSource};
pub use config::{Cli, Command, RunArgs, RunConfig};
pub use error::{RunError, StepError, SurfaceError, TrackerError, WaitPhase};
pub use flow::{Condition, Flow, StepDefinition};
pub use operator::{Decision, LineOperator, OperatorChannel};
pub use orchestrator::{ItemQueue, Orchestrator, RunMode};
pub use outcome::{
    Counts, FileLogSink, LogEntry, LogSink, MemoryLogSink, OutcomeTracker, RunResult,
};
pub use poll::{settle, wait_for, wait_until, Satisfied, WaitTimeout};
pub use post_run::PostRun;
pub use runner::{WizardRunner, WizardState};
pub use source::{
    spawn_location_observer, DirectorySource, FixedSource, Item, ItemSource, RecordFileSource,
    PASSWORD_FIELD, PATH_FIELD,
};
pub use surface::{
    installer_command, ChromeProvider, ChromeSurface, DesktopOptions, Interaction, LaunchOptions,
    Selector, SurfaceDriver, SurfaceKind, SurfaceProvider,
};
