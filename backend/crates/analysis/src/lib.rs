//! Label review core: turns an uploaded label plus a session's history into
//! one bounded prompt, runs the compliance analysis and appends the result to
//! the session's iteration chain.

pub mod assembler;
pub mod clock;
pub mod completion;
pub mod engine;
pub mod ingest;
pub mod reconcile;
pub mod regulatory;
pub mod service;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use assembler::{AssembledPrompt, ContextAssembler, NewInput};
pub use engine::ComplianceEngine;
pub use ingest::{Artifact, IngestionNormalizer, NormalizedContent, Upload};
pub use regulatory::{RegulatoryContext, RegulatoryContextCache};
pub use service::{AnalysisOutcome, ChatOutcome, LabelReviewService, TextSubmission};
pub use store::{Access, SessionStore, SessionWithIterations};
