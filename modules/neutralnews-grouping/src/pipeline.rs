use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use neutralnews_common::config::{AppConfig, FileConfig};
use neutralnews_common::{
    AggregateRecord, DocumentStore, Group, GroupId, Item, ItemId, NeutralNewsError,
    NeutralSynthesizer, SynthesisSource, TextEmbedder,
};

use crate::aggregate::{build_aggregate, neutral_scores};
use crate::change_gate::{ChangeGate, GateDecision};
use crate::dispatcher::{JobKind, SynthesisDispatcher, SynthesisJob};
use crate::embedder::VoyageEmbedder;
use crate::embedding::EmbeddingResolver;
use crate::rate_limiter::RateLimiter;
use crate::reconciler::{Candidate, GroupReconciler, Reconciliation};
use crate::similarity::{normalize, SimilarityGrouper};
use crate::synthesizer::ClaudeSynthesizer;

/// Best-effort result of one grouping run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub items_considered: u32,
    pub items_excluded: u32,
    pub items_embedded: u32,
    pub candidate_clusters: u32,
    pub groups: u32,
    pub groups_allocated: u32,
    pub groups_subdivided: u32,
    pub groups_dissolved: u32,
    pub items_detached: u32,
    pub provisional_labels: u32,
    pub assignments_written: u32,
    pub gate_created: u32,
    pub gate_updated: u32,
    pub gate_skipped: u32,
    pub items_departed: u32,
    pub groups_discarded: u32,
    pub synthesis_created: u32,
    pub synthesis_updated: u32,
    pub synthesis_stopped: u32,
    pub synthesis_failed: u32,
    pub synthesis_not_submitted: u32,
    pub synthesis_calls: u32,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Grouping Run Complete ===")?;
        writeln!(f, "Items considered:   {}", self.items_considered)?;
        writeln!(f, "Items excluded:     {}", self.items_excluded)?;
        writeln!(f, "Items embedded:     {}", self.items_embedded)?;
        writeln!(f, "Candidate clusters: {}", self.candidate_clusters)?;
        writeln!(f, "Groups:             {}", self.groups)?;
        writeln!(f, "  allocated:  {}", self.groups_allocated)?;
        writeln!(f, "  subdivided: {}", self.groups_subdivided)?;
        writeln!(f, "  dissolved:  {}", self.groups_dissolved)?;
        writeln!(f, "Items detached:     {}", self.items_detached)?;
        if self.provisional_labels > 0 {
            writeln!(f, "Provisional labels: {}", self.provisional_labels)?;
        }
        writeln!(f, "Assignments written:{}", self.assignments_written)?;
        writeln!(f, "\nChange gate:")?;
        writeln!(f, "  create:    {}", self.gate_created)?;
        writeln!(f, "  update:    {}", self.gate_updated)?;
        writeln!(f, "  skip:      {}", self.gate_skipped)?;
        writeln!(f, "  departed:  {}", self.items_departed)?;
        writeln!(f, "  discarded: {}", self.groups_discarded)?;
        writeln!(f, "\nSynthesis:")?;
        writeln!(f, "  created:       {}", self.synthesis_created)?;
        writeln!(f, "  updated:       {}", self.synthesis_updated)?;
        writeln!(f, "  stopped:       {}", self.synthesis_stopped)?;
        writeln!(f, "  failed:        {}", self.synthesis_failed)?;
        writeln!(f, "  not submitted: {}", self.synthesis_not_submitted)?;
        write!(f, "  calls:         {}", self.synthesis_calls)
    }
}

/// Wires resolver, grouper, reconciler, gate and dispatcher into one pass
/// over the store.
pub struct GroupingPipeline {
    store: Arc<dyn DocumentStore>,
    resolver: EmbeddingResolver,
    grouper: SimilarityGrouper,
    reconciler: GroupReconciler,
    gate: ChangeGate,
    dispatcher: SynthesisDispatcher,
    reference_window: Duration,
    max_batch_ops: usize,
}

impl GroupingPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn TextEmbedder>,
        synthesizer: Arc<dyn NeutralSynthesizer>,
        limiter: Arc<RateLimiter>,
        config: &FileConfig,
    ) -> Self {
        let max_batch_ops = config.store.max_batch_ops.min(store.max_batch_ops()).max(1);
        Self {
            resolver: EmbeddingResolver::new(
                embedder,
                store.clone(),
                config.grouping.embedding_batch_size,
                max_batch_ops,
            ),
            grouper: SimilarityGrouper::new(&config.grouping),
            reconciler: GroupReconciler::new(&config.grouping),
            gate: ChangeGate::new(&config.change_gate),
            dispatcher: SynthesisDispatcher::new(synthesizer, limiter, config.synthesis.clone()),
            reference_window: Duration::hours(config.grouping.reference_window_hours),
            max_batch_ops,
            store,
        }
    }

    /// Production wiring: Voyage embeddings and Claude synthesis.
    pub fn from_config(store: Arc<dyn DocumentStore>, app: &AppConfig, config: &FileConfig) -> Self {
        let embedder = Arc::new(VoyageEmbedder::new(&app.voyage_api_key, &config.models));
        let synthesizer = Arc::new(ClaudeSynthesizer::new(
            &app.anthropic_api_key,
            &config.models.synthesis,
        ));
        let limiter = Arc::new(RateLimiter::from_config(&config.synthesis));
        Self::new(store, embedder, synthesizer, limiter, config)
    }

    pub async fn run(&self) -> Result<PipelineStats> {
        self.run_at(Utc::now()).await
    }

    /// One full pass. Only store and embedding failures surface as errors;
    /// everything else is absorbed into the stats.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();

        let selected = self.select_items(now).await?;
        stats.items_considered = selected.len() as u32;

        // Excluded items that still point at a group. They leave it this pass.
        let mut orphans: Vec<(ItemId, GroupId)> = Vec::new();
        let mut valid = Vec::with_capacity(selected.len());
        for item in selected {
            match validate_item(&item) {
                Ok(()) => valid.push(item),
                Err(e) => {
                    warn!(error = %e, "Excluding item");
                    stats.items_excluded += 1;
                    if let Some(group_id) = item.existing_group {
                        if !item.id.trim().is_empty() {
                            orphans.push((item.id, group_id));
                        }
                    }
                }
            }
        }

        let memberships: HashMap<ItemId, GroupId> = valid
            .iter()
            .filter_map(|i| i.existing_group.map(|g| (i.id.clone(), g)))
            .collect();
        let resolved = self.resolver.resolve(valid).await?;
        stats.items_embedded = resolved.embedded as u32;
        stats.items_excluded += resolved.excluded.len() as u32;
        orphans.extend(
            resolved
                .excluded
                .iter()
                .filter_map(|id| memberships.get(id).map(|g| (id.clone(), *g))),
        );
        let items = resolved.items;
        if items.is_empty() && orphans.is_empty() {
            info!("No items to group");
            return Ok(stats);
        }

        let vectors: Vec<Vec<f32>> = items
            .iter()
            .map(|i| normalize(i.embedding.as_deref().unwrap_or_default()))
            .collect();
        let labels = self.grouper.cluster(&vectors);

        let known_max = self.store.max_group_id().await?;
        let candidates: Vec<Candidate<'_>> = items
            .iter()
            .zip(&vectors)
            .zip(&labels)
            .map(|((item, vector), label)| Candidate {
                item,
                vector,
                label: *label,
            })
            .collect();
        let mut reconciliation = self.reconciler.reconcile(&candidates, known_max);
        absorb_orphans(&mut reconciliation, &orphans);

        stats.candidate_clusters = reconciliation.candidate_clusters as u32;
        stats.groups = reconciliation.groups.len() as u32;
        stats.groups_allocated = reconciliation.allocated as u32;
        stats.groups_subdivided = reconciliation.subdivided as u32;
        stats.groups_dissolved = reconciliation.dissolved.len() as u32;
        stats.items_detached = reconciliation.detached.len() as u32;
        stats.provisional_labels = reconciliation.provisional.len() as u32;

        stats.assignments_written = self
            .persist_groups(&items, &orphans, &reconciliation, now)
            .await? as u32;

        let by_id: HashMap<&str, &Item> = items.iter().map(|i| (i.id.as_str(), i)).collect();
        let mut previous: HashMap<GroupId, AggregateRecord> = HashMap::new();
        let mut jobs = Vec::new();

        for (group_id, members) in &reconciliation.groups {
            let record = self.store.aggregate(*group_id).await?;
            let decision = self
                .gate
                .decide(record.as_ref().map(|r| r.source_ids.as_slice()), members);

            let kind = match decision {
                GateDecision::Skip { departed } => {
                    stats.gate_skipped += 1;
                    stats.items_departed += departed.len() as u32;
                    debug!(group_id, departed = departed.len(), "Synthesis skipped");
                    continue;
                }
                GateDecision::Create => JobKind::Create,
                GateDecision::Update => JobKind::Update,
            };

            let sources: Vec<SynthesisSource> = members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|item| to_source(item))
                .filter(SynthesisSource::is_usable)
                .collect();
            if sources.len() < 2 {
                warn!(group_id, usable = sources.len(), "Too few usable sources, discarding group");
                stats.groups_discarded += 1;
                continue;
            }

            match kind {
                JobKind::Create => stats.gate_created += 1,
                JobKind::Update => stats.gate_updated += 1,
            }
            if let Some(record) = record {
                previous.insert(*group_id, record);
            }
            jobs.push(SynthesisJob {
                group_id: *group_id,
                kind,
                sources,
            });
        }

        let report = self.dispatcher.dispatch(jobs).await;
        stats.synthesis_created = report.created;
        stats.synthesis_updated = report.updated;
        stats.synthesis_stopped = report.stopped;
        stats.synthesis_failed = report.failed;
        stats.synthesis_not_submitted = report.not_submitted;
        stats.synthesis_calls = report.calls;

        let mut scores: Vec<(ItemId, u8)> = Vec::new();
        for (group_id, _, output) in report.completed() {
            let Some(members) = reconciliation.groups.get(&group_id) else {
                continue;
            };
            let member_items: Vec<&Item> = members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            let record = build_aggregate(
                group_id,
                &member_items,
                output,
                previous.get(&group_id),
                now,
            );
            self.store.upsert_aggregate(&record).await?;
            scores.extend(neutral_scores(&member_items, output));
        }
        for batch in scores.chunks(self.max_batch_ops) {
            self.store.save_neutral_scores(batch).await?;
        }

        info!("{stats}");
        Ok(stats)
    }

    /// Ungrouped items, recent grouped items, and every other member of the
    /// groups those reference. Deduplicated and ordered by (created_at, id).
    async fn select_items(&self, now: DateTime<Utc>) -> Result<Vec<Item>> {
        let ungrouped = self.store.ungrouped_items().await?;
        let recent = self
            .store
            .grouped_items_since(now - self.reference_window)
            .await?;

        let referenced: Vec<GroupId> = recent
            .iter()
            .filter_map(|i| i.existing_group)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let members = if referenced.is_empty() {
            Vec::new()
        } else {
            self.store.items_in_groups(&referenced).await?
        };

        let mut by_id: BTreeMap<ItemId, Item> = BTreeMap::new();
        for item in ungrouped.into_iter().chain(recent).chain(members) {
            by_id.entry(item.id.clone()).or_insert(item);
        }
        let mut items: Vec<Item> = by_id.into_values().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        info!(
            items = items.len(),
            reference_groups = referenced.len(),
            "Selected items for grouping"
        );
        Ok(items)
    }

    /// Write groups, deletions and changed item assignments. Orphans are
    /// always cleared. Returns the number of assignments written.
    async fn persist_groups(
        &self,
        items: &[Item],
        orphans: &[(ItemId, GroupId)],
        reconciliation: &Reconciliation,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut upserts = Vec::new();
        for (group_id, members) in &reconciliation.groups {
            match self.store.group(*group_id).await? {
                Some(existing) if existing.member_item_ids == *members => {}
                Some(existing) => upserts.push(Group {
                    group_id: *group_id,
                    member_item_ids: members.clone(),
                    created_at: existing.created_at,
                    updated_at: now,
                }),
                None => upserts.push(Group {
                    group_id: *group_id,
                    member_item_ids: members.clone(),
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
        for batch in upserts.chunks(self.max_batch_ops) {
            self.store.upsert_groups(batch).await?;
        }

        let dissolved: Vec<GroupId> = reconciliation.dissolved.iter().copied().collect();
        for batch in dissolved.chunks(self.max_batch_ops) {
            self.store.delete_groups(batch).await?;
        }

        let changes: Vec<(ItemId, Option<GroupId>)> = items
            .iter()
            .filter_map(|item| {
                let target = reconciliation.assignments.get(&item.id).copied().flatten();
                (target != item.existing_group).then(|| (item.id.clone(), target))
            })
            .chain(orphans.iter().map(|(id, _)| (id.clone(), None)))
            .collect();
        for batch in changes.chunks(self.max_batch_ops) {
            self.store.assign_groups(batch).await?;
        }

        info!(
            upserted = upserts.len(),
            deleted = dissolved.len(),
            assignments = changes.len(),
            "Groups persisted"
        );
        Ok(changes.len())
    }
}

/// Detach excluded members from their groups. A group left without any
/// surviving members is dissolved.
fn absorb_orphans(reconciliation: &mut Reconciliation, orphans: &[(ItemId, GroupId)]) {
    for (item_id, group_id) in orphans {
        reconciliation.detached.insert(item_id.clone());
        reconciliation.assignments.insert(item_id.clone(), None);
        if *group_id > 0 && !reconciliation.groups.contains_key(group_id) {
            reconciliation.dissolved.insert(*group_id);
        }
    }
}

fn validate_item(item: &Item) -> Result<(), NeutralNewsError> {
    let invalid = |reason: &str| NeutralNewsError::InvalidItem {
        id: item.id.clone(),
        reason: reason.to_string(),
    };
    if item.id.trim().is_empty() {
        return Err(invalid("empty id"));
    }
    if item.source_outlet.trim().is_empty() {
        return Err(invalid("missing source outlet"));
    }
    if item.existing_group.is_some_and(|g| g <= 0) {
        return Err(invalid("malformed group id"));
    }
    if item.text().is_none() {
        return Err(invalid("no body text or description"));
    }
    Ok(())
}

fn to_source(item: &Item) -> SynthesisSource {
    SynthesisSource {
        item_id: item.id.clone(),
        outlet: item.source_outlet.trim().to_string(),
        title: item.title.trim().to_string(),
        text: item.text().unwrap_or_default().trim().to_string(),
    }
}
