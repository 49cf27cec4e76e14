mod finding;
mod report;
mod severity;

pub use finding::Finding;
pub use report::{OsInfo, ReportSummary, RequirementsReport};
pub use severity::Severity;
