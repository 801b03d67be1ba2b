//! The analyze procedure
//!
//! Two implementations of `AnalyzeService`:
//! - `SubprocessAnalyzer`: runs an external sentiment engine (production)
//! - `MockAnalyzer`: returns a preconfigured verdict (testing)

mod mock;
mod subprocess;
mod traits;

pub use mock::{sample_verdict, MockAnalyzer};
pub use subprocess::SubprocessAnalyzer;
pub use traits::{AnalyzeRequest, AnalyzeResponse, AnalyzeService, AnalyzeTarget, Verdict};
