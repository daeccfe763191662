pub mod completion;
pub mod env;
pub mod limits;
pub mod pdf;
pub mod tracing_init;

pub use completion::CompletionConfig;
pub use env::AppConfig;
pub use limits::AnalysisLimits;
pub use pdf::PdftoppmConfig;
pub use tracing_init::init_tracing;
