use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeutralNewsError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid item {id}: {reason}")]
    InvalidItem { id: String, reason: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Failure modes of the synthesis collaborator. The dispatcher picks its
/// strategy (cooldown, reduce-and-retry, backoff) from the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    /// Provider throttled the request.
    #[error("synthesis rate limited: {0}")]
    RateLimited(String),

    /// Account quota exhausted.
    #[error("synthesis quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Prompt too large for the model.
    #[error("synthesis input too large: {0}")]
    ContextTooLarge(String),

    /// Network hiccup or server-side failure; worth a retry.
    #[error("transient synthesis failure: {0}")]
    Transient(String),

    /// The model answered, but not with usable structured output.
    #[error("invalid synthesis response: {0}")]
    InvalidResponse(String),

    /// The provider refused the request itself. Resending it cannot help.
    #[error("synthesis request rejected: {0}")]
    Rejected(String),
}

impl SynthesisError {
    /// Throttling and quota errors stop the whole dispatch run.
    pub fn is_hard_limit(&self) -> bool {
        matches!(
            self,
            SynthesisError::RateLimited(_) | SynthesisError::QuotaExhausted(_)
        )
    }
}
