//! 报告的生成、双路写入与落盘

pub mod file;
pub mod tee;
pub mod xml;

pub use file::{ReportFile, report_path};
pub use tee::{ReportSink, ReportTee};
pub use xml::{ReportDocument, ReportSummary, parse_summary};
