//! Folding a synthesis result back into the store's records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use neutralnews_common::{AggregateRecord, GroupId, Item, ItemId, SynthesisOutput};

use crate::image::{select_representative_image, ImageCandidate};

fn outlet_key(outlet: &str) -> String {
    outlet.trim().to_lowercase()
}

/// Per-item neutrality scores, matched from the model's per-outlet ratings.
/// Members whose outlet was not rated get no score.
pub fn neutral_scores(members: &[&Item], output: &SynthesisOutput) -> Vec<(ItemId, u8)> {
    let ratings: HashMap<String, u8> = output
        .source_ratings
        .iter()
        .map(|(outlet, rating)| (outlet_key(outlet), *rating))
        .collect();
    members
        .iter()
        .filter_map(|item| {
            ratings
                .get(&outlet_key(&item.source_outlet))
                .map(|rating| (item.id.clone(), *rating))
        })
        .collect()
}

/// Build the aggregate for a group after a successful synthesis.
///
/// `members` must be in `source_ids` order. On update the previous record's
/// `created_at` is kept, and so is its image when no member qualifies now.
pub fn build_aggregate(
    group_id: GroupId,
    members: &[&Item],
    output: &SynthesisOutput,
    previous: Option<&AggregateRecord>,
    now: DateTime<Utc>,
) -> AggregateRecord {
    let scores: HashMap<ItemId, u8> = neutral_scores(members, output).into_iter().collect();
    let candidates: Vec<ImageCandidate<'_>> = members
        .iter()
        .map(|item| ImageCandidate {
            outlet: item.source_outlet.as_str(),
            image_url: item.image_url.as_deref(),
            score: scores.get(&item.id).copied(),
        })
        .collect();

    let (representative_image, image_outlet) = match select_representative_image(&candidates) {
        Some((url, outlet)) => (Some(url), Some(outlet)),
        None => previous
            .map(|p| (p.representative_image.clone(), p.image_outlet.clone()))
            .unwrap_or((None, None)),
    };

    let mut source_ids: Vec<ItemId> = members.iter().map(|i| i.id.clone()).collect();
    source_ids.sort();

    let date = members
        .iter()
        .map(|i| i.published_at())
        .min()
        .unwrap_or(now);

    AggregateRecord {
        group_id,
        neutral_title: output.neutral_title.clone(),
        neutral_summary: output.neutral_summary.clone(),
        category: output.category,
        relevance: output.relevance,
        source_ids,
        representative_image,
        image_outlet,
        date,
        created_at: previous.map(|p| p.created_at).unwrap_or(now),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use neutralnews_common::Category;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 4, 9, 0, 0).unwrap()
    }

    fn item(id: &str, outlet: &str, image: Option<&str>, pub_date: Option<&str>) -> Item {
        Item {
            id: id.to_string(),
            title: "t".to_string(),
            body_text: Some("b".to_string()),
            description: None,
            source_outlet: outlet.to_string(),
            existing_group: Some(1),
            embedding: None,
            image_url: image.map(str::to_string),
            pub_date: pub_date.map(str::to_string),
            created_at: now(),
            neutral_score: None,
        }
    }

    fn output(ratings: &[(&str, u8)]) -> SynthesisOutput {
        SynthesisOutput {
            neutral_title: "Neutral".to_string(),
            neutral_summary: "Summary".to_string(),
            category: Category::Politics,
            relevance: 4,
            source_ratings: ratings
                .iter()
                .map(|(o, r)| (o.to_string(), *r))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn scores_match_outlets_case_insensitively() {
        let a = item("a", "El País", None, None);
        let b = item("b", "ABC", None, None);
        let c = item("c", "Ara", None, None);
        let scores = neutral_scores(&[&a, &b, &c], &output(&[("el país", 70), ("abc ", 40)]));
        assert_eq!(scores, vec![("a".to_string(), 70), ("b".to_string(), 40)]);
    }

    #[test]
    fn new_aggregate_takes_oldest_date_and_best_image() {
        let a = item(
            "b-id",
            "abc",
            Some("https://abc.es/img/1.jpg"),
            Some("Sat, 03 May 2025 18:00:00 +0000"),
        );
        let b = item(
            "a-id",
            "elpais",
            Some("https://elpais.com/img/2.png"),
            Some("Sat, 03 May 2025 09:30:00 +0000"),
        );
        let record = build_aggregate(
            5,
            &[&a, &b],
            &output(&[("abc", 30), ("elpais", 90)]),
            None,
            now(),
        );
        assert_eq!(record.source_ids, vec!["a-id".to_string(), "b-id".to_string()]);
        assert_eq!(record.representative_image.as_deref(), Some("https://elpais.com/img/2.png"));
        assert_eq!(record.image_outlet.as_deref(), Some("elpais"));
        assert_eq!(record.date, Utc.with_ymd_and_hms(2025, 5, 3, 9, 30, 0).unwrap());
        assert_eq!(record.created_at, now());
    }

    #[test]
    fn update_preserves_created_at_and_previous_image() {
        let a = item("a", "abc", Some("https://abc.es/video/1.mp4"), None);
        let b = item("b", "elpais", None, None);
        let created = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let previous = AggregateRecord {
            group_id: 5,
            neutral_title: "old".to_string(),
            neutral_summary: "old".to_string(),
            category: Category::Other,
            relevance: 2,
            source_ids: vec!["a".to_string()],
            representative_image: Some("https://x.com/old.jpg".to_string()),
            image_outlet: Some("x".to_string()),
            date: created,
            created_at: created,
            updated_at: created,
        };
        let record = build_aggregate(5, &[&a, &b], &output(&[]), Some(&previous), now());
        assert_eq!(record.created_at, created);
        assert_eq!(record.updated_at, now());
        assert_eq!(record.representative_image.as_deref(), Some("https://x.com/old.jpg"));
        assert_eq!(record.neutral_title, "Neutral");
        assert_eq!(record.date, now());
    }
}
