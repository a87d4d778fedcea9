//! Claude-backed neutral synthesis.
//!
//! Builds one prompt per group, sized against a token budget before the call,
//! and maps provider errors onto [`SynthesisError`] so the dispatcher can
//! pick a strategy.

use std::collections::BTreeMap;

use ai_client::claude::Claude;
use ai_client::util::{truncate_to_char_boundary, truncate_to_line_boundary};
use ai_client::AiError;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use neutralnews_common::{Category, NeutralSynthesizer, SynthesisError, SynthesisOutput, SynthesisSource};

const CHARS_PER_TOKEN: usize = 4;
const MAX_PROMPT_TOKENS: usize = 125_000;
/// Outliers are only trimmed past this length.
const OUTLIER_MIN_CHARS: usize = 10_000;

const SYSTEM_PROMPT: &str = "\
You are an impartial news analyst. You will receive several headlines and texts \
describing the same story as told by different outlets.

1. Write a concise neutral headline (8 to 14 words) that states the core fact.
2. Write a neutral summary in short paragraphs (at most 50 words each, about 250 words \
in total). The first paragraph carries the most important information.
3. Rate each outlet's neutrality from 0 (heavily slanted) to 100 (fully neutral). Use \
the outlet names exactly as given.
4. Assign one category: Economy, Politics, Science, Technology, Culture, Society, \
Sports, International, Entertainment, Other.
5. Rate relevance from 1 to 5: 1 very low (local interest, advertising or propaganda), \
2 low (limited groups), 3 medium (general interest, little impact), 4 high (broad \
interest with social, political or economic impact), 5 very high (front-page news).";

const TRUNCATED_LENGTH: &str = "... [truncated due to excessive length]";
const TRUNCATED_BUDGET: &str = "\n... [truncated due to token limit]\n\n";

#[derive(Debug, Deserialize, JsonSchema)]
struct NeutralSynthesisResponse {
    /// Neutral headline, 8 to 14 words.
    neutral_title: String,
    /// Neutral summary, short paragraphs.
    neutral_summary: String,
    /// One of the listed categories.
    category: String,
    /// 1 (very low) to 5 (very high).
    relevance: i64,
    source_ratings: Vec<SourceRating>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SourceRating {
    /// Outlet name exactly as given in the input.
    outlet: String,
    /// 0 (slanted) to 100 (neutral).
    rating: i64,
}

impl From<NeutralSynthesisResponse> for SynthesisOutput {
    fn from(r: NeutralSynthesisResponse) -> Self {
        let source_ratings: BTreeMap<String, u8> = r
            .source_ratings
            .into_iter()
            .map(|s| (s.outlet.trim().to_string(), s.rating.clamp(0, 100) as u8))
            .collect();
        SynthesisOutput {
            neutral_title: r.neutral_title.trim().to_string(),
            neutral_summary: r.neutral_summary.trim().to_string(),
            category: Category::parse(&r.category),
            relevance: r.relevance.clamp(1, 5) as u8,
            source_ratings,
        }
    }
}

pub struct ClaudeSynthesizer {
    claude: Claude,
}

impl ClaudeSynthesizer {
    pub fn new(anthropic_api_key: &str, model: &str) -> Self {
        Self {
            claude: Claude::new(anthropic_api_key, model),
        }
    }
}

#[async_trait]
impl NeutralSynthesizer for ClaudeSynthesizer {
    async fn generate(
        &self,
        sources: &[SynthesisSource],
    ) -> Result<SynthesisOutput, SynthesisError> {
        let user_prompt = build_user_prompt(sources, MAX_PROMPT_TOKENS);
        debug!(
            sources = sources.len(),
            prompt_chars = user_prompt.len(),
            "Requesting neutral synthesis"
        );

        let response: NeutralSynthesisResponse = self
            .claude
            .extract(SYSTEM_PROMPT, user_prompt)
            .await
            .map_err(map_ai_error)?;

        if response.neutral_title.trim().is_empty() || response.neutral_summary.trim().is_empty() {
            return Err(SynthesisError::InvalidResponse(
                "empty neutral title or summary".to_string(),
            ));
        }
        Ok(response.into())
    }
}

fn map_ai_error(err: AiError) -> SynthesisError {
    match err {
        AiError::RateLimited { message } => SynthesisError::RateLimited(message),
        AiError::QuotaExhausted { message } => SynthesisError::QuotaExhausted(message),
        AiError::ContextLengthExceeded { message } => SynthesisError::ContextTooLarge(message),
        AiError::Decode(message) => SynthesisError::InvalidResponse(message),
        e if e.is_transient() => SynthesisError::Transient(e.to_string()),
        e if e.is_rejected() => {
            warn!(error = %e, "Synthesis request rejected by provider");
            SynthesisError::Rejected(e.to_string())
        }
        e => {
            warn!(error = %e, "Unclassified synthesis error");
            SynthesisError::InvalidResponse(e.to_string())
        }
    }
}

/// Render sources into the user prompt within `max_tokens` (estimated at
/// four characters per token, system prompt included).
///
/// Texts more than three times the group average and longer than
/// [`OUTLIER_MIN_CHARS`] are cut to `max(2 * average, OUTLIER_MIN_CHARS)`.
/// Sources are then appended in order until the budget runs out; the source
/// that overflows is cut at a line boundary and nothing after it is sent.
pub fn build_user_prompt(sources: &[SynthesisSource], max_tokens: usize) -> String {
    let budget_chars = max_tokens
        .saturating_mul(CHARS_PER_TOKEN)
        .saturating_sub(SYSTEM_PROMPT.len());

    let average = if sources.is_empty() {
        0
    } else {
        sources.iter().map(|s| s.text.len()).sum::<usize>() / sources.len()
    };

    let mut prompt = String::from("Analyze the following news sources:\n\n");
    for (i, source) in sources.iter().enumerate() {
        let text = trim_outlier(&source.text, average);
        let block = format!(
            "Source {}: {}\nHeadline: {}\nText: {}\n\n",
            i + 1,
            source.outlet,
            source.title,
            text
        );

        if prompt.len() + block.len() > budget_chars {
            let remaining = budget_chars.saturating_sub(prompt.len());
            let head = truncate_to_line_boundary(&block, remaining);
            if !head.is_empty() {
                prompt.push_str(head);
                prompt.push_str(TRUNCATED_BUDGET);
            }
            break;
        }
        prompt.push_str(&block);
    }
    prompt
}

fn trim_outlier(text: &str, average: usize) -> String {
    if text.len() > average.saturating_mul(3) && text.len() > OUTLIER_MIN_CHARS {
        let keep = average.saturating_mul(2).max(OUTLIER_MIN_CHARS);
        format!("{}{}", truncate_to_char_boundary(text, keep), TRUNCATED_LENGTH)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(outlet: &str, text: String) -> SynthesisSource {
        SynthesisSource {
            item_id: outlet.to_string(),
            outlet: outlet.to_string(),
            title: format!("{outlet} headline"),
            text,
        }
    }

    #[test]
    fn response_is_clamped_and_parsed() {
        let response = NeutralSynthesisResponse {
            neutral_title: " Title ".to_string(),
            neutral_summary: "Summary".to_string(),
            category: "Política".to_string(),
            relevance: 7,
            source_ratings: vec![
                SourceRating {
                    outlet: "abc".to_string(),
                    rating: 140,
                },
                SourceRating {
                    outlet: "ara".to_string(),
                    rating: -3,
                },
            ],
        };
        let out: SynthesisOutput = response.into();
        assert_eq!(out.neutral_title, "Title");
        assert_eq!(out.category, Category::Politics);
        assert_eq!(out.relevance, 5);
        assert_eq!(out.source_ratings["abc"], 100);
        assert_eq!(out.source_ratings["ara"], 0);
    }

    #[test]
    fn error_mapping() {
        assert_eq!(
            map_ai_error(AiError::RateLimited { message: "slow".into() }),
            SynthesisError::RateLimited("slow".into())
        );
        assert_eq!(
            map_ai_error(AiError::QuotaExhausted { message: "quota".into() }),
            SynthesisError::QuotaExhausted("quota".into())
        );
        assert!(matches!(
            map_ai_error(AiError::ContextLengthExceeded { message: "big".into() }),
            SynthesisError::ContextTooLarge(_)
        ));
        assert!(matches!(
            map_ai_error(AiError::Api { status: 529, message: "overloaded".into() }),
            SynthesisError::Transient(_)
        ));
        assert!(matches!(
            map_ai_error(AiError::Api { status: 400, message: "bad".into() }),
            SynthesisError::Rejected(_)
        ));
        assert!(matches!(
            map_ai_error(AiError::Decode("no tool input".into())),
            SynthesisError::InvalidResponse(_)
        ));
    }

    #[test]
    fn anthropic_prompt_too_long_takes_the_reduce_path() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"prompt is too long: 215000 tokens > 200000 maximum"}}"#;
        assert!(matches!(
            map_ai_error(AiError::from_response(400, body)),
            SynthesisError::ContextTooLarge(_)
        ));
    }

    #[test]
    fn prompt_lists_every_source_within_budget() {
        let sources = vec![
            source("abc", "first text".to_string()),
            source("elpais", "second text".to_string()),
        ];
        let prompt = build_user_prompt(&sources, MAX_PROMPT_TOKENS);
        assert!(prompt.contains("Source 1: abc\nHeadline: abc headline\nText: first text"));
        assert!(prompt.contains("Source 2: elpais"));
        assert!(!prompt.contains("truncated"));
    }

    #[test]
    fn outlier_text_is_trimmed() {
        let sources = vec![
            source("a", "a".repeat(1_000)),
            source("b", "b".repeat(1_000)),
            source("c", "c".repeat(1_000)),
            source("d", "d".repeat(60_000)),
        ];
        // Average is 15,750 so the cap is 31,500.
        let prompt = build_user_prompt(&sources, MAX_PROMPT_TOKENS);
        assert!(prompt.contains(TRUNCATED_LENGTH));
        assert!(!prompt.contains(&"d".repeat(31_501)));
        assert!(prompt.contains(&"d".repeat(31_500)));
    }

    #[test]
    fn budget_overflow_cuts_and_stops() {
        let sources = vec![
            source("a", "line one\nline two\n".repeat(50)),
            source("b", "more\n".repeat(5_000)),
            source("c", "never sent".to_string()),
        ];
        // Tiny budget: the system prompt plus about 1,000 characters.
        let tokens = (SYSTEM_PROMPT.len() + 1_500) / CHARS_PER_TOKEN;
        let prompt = build_user_prompt(&sources, tokens);
        assert!(prompt.contains("Source 1: a"));
        assert!(prompt.contains("[truncated due to token limit]"));
        assert!(!prompt.contains("never sent"));
    }
}
