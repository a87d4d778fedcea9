pub mod aggregate;
pub mod change_gate;
pub mod dispatcher;
pub mod embedder;
pub mod embedding;
pub mod image;
pub mod partition;
pub mod pipeline;
pub mod rate_limiter;
pub mod reconciler;
pub mod similarity;
pub mod synthesizer;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use change_gate::{ChangeGate, GateDecision};
pub use dispatcher::{DispatchReport, JobKind, JobOutcome, SynthesisDispatcher, SynthesisJob};
pub use embedder::VoyageEmbedder;
pub use embedding::EmbeddingResolver;
pub use pipeline::{GroupingPipeline, PipelineStats};
pub use rate_limiter::RateLimiter;
pub use reconciler::{GroupReconciler, Reconciliation};
pub use similarity::SimilarityGrouper;
pub use synthesizer::ClaudeSynthesizer;
