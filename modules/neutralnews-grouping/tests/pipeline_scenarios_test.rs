//! End-to-end grouping scenarios against the in-memory store.

mod harness;

use harness::{aggregate, assert_groups_valid, grouped, group_doc, news, Harness};
use neutralnews_grouping::testutil::{InMemoryStore, WriteKind};

#[tokio::test]
async fn five_outlets_on_one_story_form_one_group() {
    let store = InMemoryStore::new().with_items([
        news("a", "abc", 0.0),
        news("b", "elpais", 1.0),
        news("c", "elmundo", 2.0),
        news("d", "ara", 3.0),
        news("e", "publico", 4.0),
    ]);
    let h = Harness::new(store);

    let stats = h.run().await;

    assert_eq!(stats.groups, 1);
    assert_eq!(stats.gate_created, 1);
    assert_eq!(stats.synthesis_created, 1);
    assert_eq!(stats.synthesis_calls, 1);
    assert_eq!(h.synthesizer.call_count(), 1);
    assert_eq!(h.synthesizer.calls()[0].len(), 5);

    for id in ["a", "b", "c", "d", "e"] {
        assert_eq!(h.group_of(id), Some(1), "item {id}");
        assert_eq!(h.store.item(id).unwrap().neutral_score, Some(50));
    }
    let record = &h.store.aggregates()[&1];
    assert_eq!(record.source_ids, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(record.neutral_title, "Neutral: Headline a");
    assert_eq!(h.store.groups()[&1].member_item_ids.len(), 5);
}

#[tokio::test]
async fn same_outlet_pair_is_dissolved() {
    let store = InMemoryStore::new().with_items([news("a", "abc", 0.0), news("b", "abc", 0.1)]);
    let h = Harness::new(store);

    let stats = h.run().await;

    assert_eq!(stats.groups, 0);
    assert_eq!(stats.items_detached, 1);
    assert_eq!(stats.provisional_labels, 2);
    assert_eq!(h.synthesizer.call_count(), 0);
    assert_eq!(h.group_of("a"), None);
    assert_eq!(h.group_of("b"), None);
    assert!(h.store.groups().is_empty());
    assert!(h.store.aggregates().is_empty());
}

#[tokio::test]
async fn unchanged_membership_skips_synthesis() {
    let store = InMemoryStore::new().with_items([
        grouped("1", "abc", 0.0, 1),
        grouped("2", "elpais", 1.0, 1),
        grouped("3", "elmundo", 2.0, 1),
    ]);
    store.insert_group(group_doc(1, &["1", "2", "3"]));
    store.insert_aggregate(aggregate(1, &["1", "2", "3"]));
    let before = store.aggregates();
    let h = Harness::new(store);

    let stats = h.run().await;

    assert_eq!(stats.gate_skipped, 1);
    assert_eq!(stats.synthesis_calls, 0);
    assert_eq!(h.synthesizer.call_count(), 0);
    assert_eq!(h.store.aggregates(), before);
    assert!(h
        .store
        .writes()
        .iter()
        .all(|(kind, _)| *kind != WriteKind::Aggregate && *kind != WriteKind::Assignments));
}

#[tokio::test]
async fn crossing_a_size_bucket_triggers_update() {
    let store = InMemoryStore::new().with_items([
        grouped("1", "abc", 0.0, 1),
        grouped("2", "elpais", 1.0, 1),
        grouped("3", "elmundo", 2.0, 1),
        news("4", "ara", 0.5),
        news("5", "publico", 1.5),
        news("6", "rtve", 2.5),
    ]);
    store.insert_group(group_doc(1, &["1", "2", "3"]));
    store.insert_aggregate(aggregate(1, &["1", "2", "3"]));
    let h = Harness::new(store);

    let stats = h.run().await;

    assert_eq!(stats.gate_updated, 1);
    assert_eq!(stats.synthesis_updated, 1);
    assert_eq!(h.synthesizer.call_count(), 1);
    for id in ["4", "5", "6"] {
        assert_eq!(h.group_of(id), Some(1));
    }
    let record = &h.store.aggregates()[&1];
    assert_eq!(record.source_ids, vec!["1", "2", "3", "4", "5", "6"]);
    assert_eq!(record.created_at, harness::base_time());
    assert_eq!(record.neutral_title, "Neutral: Headline 1");
    assert_groups_valid(&h.store);
}

#[tokio::test]
async fn two_stories_get_two_groups() {
    let store = InMemoryStore::new().with_items([
        news("a1", "abc", 0.0),
        news("b1", "abc", 120.0),
        news("a2", "elpais", 2.0),
        news("b2", "elpais", 122.0),
        news("lonely", "ara", 240.0),
    ]);
    let h = Harness::new(store);

    let stats = h.run().await;

    assert_eq!(stats.groups, 2);
    assert_eq!(h.synthesizer.call_count(), 2);
    assert_eq!(h.group_of("a1"), h.group_of("a2"));
    assert_eq!(h.group_of("b1"), h.group_of("b2"));
    assert_ne!(h.group_of("a1"), h.group_of("b1"));
    assert_eq!(h.group_of("lonely"), None);
    assert_groups_valid(&h.store);
}
