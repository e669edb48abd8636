pub mod executor;
pub mod generator;
pub mod reporter;
pub mod types;

pub use executor::TestExecutor;
pub use generator::TestReportGenerator;
pub use reporter::TestReporter;
pub use types::{RunCounts, RunResult, TestCaseResult, TestOutcome};
