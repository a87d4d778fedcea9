//! Shared fixtures for grouping pipeline tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use neutralnews_common::config::FileConfig;
use neutralnews_common::{AggregateRecord, Category, Group, GroupId, Item};
use neutralnews_grouping::testutil::{FixedEmbedder, InMemoryStore, ScriptedSynthesizer};
use neutralnews_grouping::{GroupingPipeline, PipelineStats, RateLimiter};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 3, 12, 0, 0).unwrap()
}

/// Unit vector in the xy-plane at `deg` degrees.
pub fn at(deg: f32) -> Vec<f32> {
    let r = deg.to_radians();
    vec![r.cos(), r.sin(), 0.0]
}

/// An ungrouped item that already carries an embedding.
pub fn news(id: &str, outlet: &str, deg: f32) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Headline {id}"),
        body_text: Some(format!("Body of article {id} from {outlet}.")),
        description: None,
        source_outlet: outlet.to_string(),
        existing_group: None,
        embedding: Some(at(deg)),
        image_url: None,
        pub_date: None,
        created_at: base_time(),
        neutral_score: None,
    }
}

pub fn grouped(id: &str, outlet: &str, deg: f32, group: GroupId) -> Item {
    Item {
        existing_group: Some(group),
        ..news(id, outlet, deg)
    }
}

pub fn group_doc(group_id: GroupId, members: &[&str]) -> Group {
    Group {
        group_id,
        member_item_ids: members.iter().map(|m| m.to_string()).collect(),
        created_at: base_time(),
        updated_at: base_time(),
    }
}

pub fn aggregate(group_id: GroupId, source_ids: &[&str]) -> AggregateRecord {
    AggregateRecord {
        group_id,
        neutral_title: "Existing neutral title".to_string(),
        neutral_summary: "Existing summary".to_string(),
        category: Category::Politics,
        relevance: 3,
        source_ids: source_ids.iter().map(|s| s.to_string()).collect(),
        representative_image: None,
        image_outlet: None,
        date: base_time(),
        created_at: base_time(),
        updated_at: base_time(),
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<FixedEmbedder>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub pipeline: GroupingPipeline,
}

impl Harness {
    pub fn new(store: InMemoryStore) -> Self {
        Self::build(
            store,
            FixedEmbedder::new(3),
            ScriptedSynthesizer::new(),
            FileConfig::default(),
        )
    }

    pub fn build(
        store: InMemoryStore,
        embedder: FixedEmbedder,
        synthesizer: ScriptedSynthesizer,
        config: FileConfig,
    ) -> Self {
        let store = Arc::new(store);
        let embedder = Arc::new(embedder);
        let synthesizer = Arc::new(synthesizer);
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(60)));
        let pipeline = GroupingPipeline::new(
            store.clone(),
            embedder.clone(),
            synthesizer.clone(),
            limiter,
            &config,
        );
        Self {
            store,
            embedder,
            synthesizer,
            pipeline,
        }
    }

    /// Run one pass an hour after the fixtures were created.
    pub async fn run(&self) -> PipelineStats {
        self.pipeline
            .run_at(base_time() + chrono::Duration::hours(1))
            .await
            .expect("pipeline run failed")
    }

    pub fn group_of(&self, id: &str) -> Option<GroupId> {
        self.store.item(id).and_then(|i| i.existing_group)
    }
}

/// Every persisted group has at least two members and no outlet twice.
pub fn assert_groups_valid(store: &InMemoryStore) {
    let items = store.items();
    for (group_id, group) in store.groups() {
        let outlets: Vec<String> = items
            .iter()
            .filter(|i| group.member_item_ids.contains(&i.id))
            .map(|i| i.source_outlet.trim().to_lowercase())
            .collect();
        let distinct: std::collections::BTreeSet<&String> = outlets.iter().collect();
        assert!(
            distinct.len() >= 2,
            "group {group_id} has {} distinct outlets",
            distinct.len()
        );
        assert_eq!(
            distinct.len(),
            outlets.len(),
            "group {group_id} repeats an outlet"
        );
    }
}
