pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod logger;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod script;

// Re-export commonly used types
pub use context::{Charset, ContextScope, ScriptContext, SourceSelector, SourceUnit};
pub use discovery::DiscoveryMode;
pub use error::{Result, ScriptestError};
pub use orchestrator::{AggregateResult, SuiteOrchestrator, SuiteSpec, Verdict};
pub use runner::{RunResult, TestReportGenerator};
