//! Message eligibility pipeline.
//!
//! Every admitted message flows through:
//! 1. `GatePipeline::admit()`: dedup, before the message is fetched
//! 2. `GatePipeline::evaluate()`: header/label/cooldown checks, then
//!    `Classifier::analyze()`, keyword relevance, config and rate limit
//! 3. `ReplyGenerator::generate()`: only for eligible messages

pub mod classifier;
pub mod gates;
pub mod generator;
pub mod relevance;

pub use classifier::{Classification, Classifier, LlmClassifier, Priority};
pub use gates::{GateContext, GateDecision, GatePipeline, SkipReason};
pub use generator::{LlmReplyGenerator, ReplyGenerator};
pub use relevance::RelevanceFilter;

use std::future::Future;
use std::time::Duration;

use crate::error::PipelineError;

/// Bound an external call. Elapsed time maps to [`PipelineError::Timeout`].
pub async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { operation, timeout }),
    }
}
