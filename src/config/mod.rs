pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{DEFAULT_REPORTS_DIR, ScriptestConfig, SuiteConfig};
