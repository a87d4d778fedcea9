use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dates::parse_pub_date;

/// Stable item identifier assigned by the acquisition side.
pub type ItemId = String;

/// Persistent group identifier. Allocated as `max(known) + 1`.
pub type GroupId = i64;

// --- Items ---

/// A news article as stored by the acquisition collaborator.
///
/// `existing_group` and `embedding` are the only fields this crate mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    /// Scraped article body. Primary text for embedding and synthesis.
    pub body_text: Option<String>,
    /// Feed-provided description. Fallback when `body_text` is empty.
    pub description: Option<String>,
    pub source_outlet: String,
    pub existing_group: Option<GroupId>,
    pub embedding: Option<Vec<f32>>,
    pub image_url: Option<String>,
    /// Raw RSS publication date string.
    pub pub_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub neutral_score: Option<u8>,
}

impl Item {
    /// Body text, falling back to the feed description. `None` when both are blank.
    pub fn text(&self) -> Option<&str> {
        [self.body_text.as_deref(), self.description.as_deref()]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty())
    }

    /// A stored vector is reusable when it is non-empty and not entirely NaN.
    pub fn has_valid_embedding(&self) -> bool {
        match &self.embedding {
            Some(v) => !v.is_empty() && !v.iter().all(|x| x.is_nan()),
            None => false,
        }
    }

    /// Publication time, falling back to ingestion time when the feed date is
    /// missing or unparseable.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.pub_date
            .as_deref()
            .and_then(parse_pub_date)
            .unwrap_or(self.created_at)
    }

    pub fn is_reference(&self) -> bool {
        self.existing_group.is_some()
    }
}

// --- Groups ---

/// A persisted set of items believed to describe the same event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: GroupId,
    pub member_item_ids: BTreeSet<ItemId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Synthesis ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Economy,
    Politics,
    Science,
    Technology,
    Culture,
    Society,
    Sports,
    International,
    Entertainment,
    Other,
}

impl Category {
    /// Lenient parse. Accepts English and Spanish labels, case- and
    /// accent-insensitive; anything unrecognised becomes `Other`.
    pub fn parse(label: &str) -> Self {
        let folded: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' => 'a',
                'é' => 'e',
                'í' => 'i',
                'ó' => 'o',
                'ú' => 'u',
                other => other,
            })
            .collect();
        match folded.as_str() {
            "economy" | "economia" => Category::Economy,
            "politics" | "politica" => Category::Politics,
            "science" | "ciencia" => Category::Science,
            "technology" | "tecnologia" => Category::Technology,
            "culture" | "cultura" => Category::Culture,
            "society" | "sociedad" => Category::Society,
            "sports" | "deportes" => Category::Sports,
            "international" | "internacional" => Category::International,
            "entertainment" | "entretenimiento" => Category::Entertainment,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Economy => "economy",
            Category::Politics => "politics",
            Category::Science => "science",
            Category::Technology => "technology",
            Category::Culture => "culture",
            Category::Society => "society",
            Category::Sports => "sports",
            Category::International => "international",
            Category::Entertainment => "entertainment",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// One article as handed to the synthesis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSource {
    pub item_id: ItemId,
    pub outlet: String,
    pub title: String,
    pub text: String,
}

impl SynthesisSource {
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty() && !self.text.trim().is_empty()
    }
}

/// Structured output of one synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub neutral_title: String,
    pub neutral_summary: String,
    pub category: Category,
    /// 1 (very low) ..= 5 (front page).
    pub relevance: u8,
    /// Neutrality rating per outlet, 0..=100.
    pub source_ratings: BTreeMap<String, u8>,
}

impl SynthesisOutput {
    pub fn clamped(mut self) -> Self {
        self.relevance = self.relevance.clamp(1, 5);
        for rating in self.source_ratings.values_mut() {
            *rating = (*rating).min(100);
        }
        self
    }
}

/// Persisted synthesis for one group, keyed by `group_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub group_id: GroupId,
    pub neutral_title: String,
    pub neutral_summary: String,
    pub category: Category,
    pub relevance: u8,
    /// Sorted member ids at the time of the last synthesis.
    pub source_ids: Vec<ItemId>,
    pub representative_image: Option<String>,
    pub image_outlet: Option<String>,
    /// Oldest publication date among the sources.
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item() -> Item {
        Item {
            id: "a".to_string(),
            title: "Title".to_string(),
            body_text: None,
            description: None,
            source_outlet: "abc".to_string(),
            existing_group: None,
            embedding: None,
            image_url: None,
            pub_date: None,
            created_at: Utc.with_ymd_and_hms(2025, 5, 3, 12, 0, 0).unwrap(),
            neutral_score: None,
        }
    }

    #[test]
    fn text_prefers_body_then_description() {
        let mut it = item();
        assert_eq!(it.text(), None);
        it.description = Some("desc".to_string());
        assert_eq!(it.text(), Some("desc"));
        it.body_text = Some("   ".to_string());
        assert_eq!(it.text(), Some("desc"));
        it.body_text = Some("body".to_string());
        assert_eq!(it.text(), Some("body"));
    }

    #[test]
    fn embedding_validity() {
        let mut it = item();
        assert!(!it.has_valid_embedding());
        it.embedding = Some(vec![]);
        assert!(!it.has_valid_embedding());
        it.embedding = Some(vec![f32::NAN, f32::NAN]);
        assert!(!it.has_valid_embedding());
        it.embedding = Some(vec![f32::NAN, 0.5]);
        assert!(it.has_valid_embedding());
    }

    #[test]
    fn published_at_falls_back_to_created_at() {
        let mut it = item();
        assert_eq!(it.published_at(), it.created_at);
        it.pub_date = Some("not a date".to_string());
        assert_eq!(it.published_at(), it.created_at);
        it.pub_date = Some("Sat, 03 May 2025 18:07:56 +0200".to_string());
        assert_eq!(
            it.published_at(),
            Utc.with_ymd_and_hms(2025, 5, 3, 16, 7, 56).unwrap()
        );
    }

    #[test]
    fn category_parse_is_lenient() {
        assert_eq!(Category::parse("Economía"), Category::Economy);
        assert_eq!(Category::parse("POLITICS"), Category::Politics);
        assert_eq!(Category::parse(" Tecnología "), Category::Technology);
        assert_eq!(Category::parse("Otros"), Category::Other);
        assert_eq!(Category::parse("gossip"), Category::Other);
    }

    #[test]
    fn synthesis_output_is_clamped() {
        let out = SynthesisOutput {
            neutral_title: "t".to_string(),
            neutral_summary: "s".to_string(),
            category: Category::Other,
            relevance: 9,
            source_ratings: BTreeMap::from([("abc".to_string(), 250)]),
        }
        .clamped();
        assert_eq!(out.relevance, 5);
        assert_eq!(out.source_ratings["abc"], 100);
    }
}
