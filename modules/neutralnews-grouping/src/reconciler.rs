//! Turns ephemeral cluster labels into stable, persistent group ids.
//!
//! Reference items (those already carrying a group) anchor each candidate
//! cluster to an existing id. New items follow the anchor when the cluster is
//! coherent enough, or start a fresh group otherwise. Reference items are
//! never moved between existing groups; the only exception is subdivision of
//! an oversized ("hot") group, which splits it into new ids.
//!
//! Once assignment is done every group is deduplicated per outlet and any
//! group left with fewer than two outlets is dissolved.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use neutralnews_common::config::GroupingConfig;
use neutralnews_common::{GroupId, Item, ItemId};

use crate::partition::partition;
use crate::similarity::{mean_pairwise_similarity, NOISE};

/// One clustered item as seen by the reconciler.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub item: &'a Item,
    /// Unit-length embedding.
    pub vector: &'a [f32],
    pub label: i32,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    /// Final group (or none) for every candidate.
    pub assignments: BTreeMap<ItemId, Option<GroupId>>,
    /// Surviving groups. Each has at least two members from distinct outlets.
    pub groups: BTreeMap<GroupId, BTreeSet<ItemId>>,
    /// Items dropped from their group as same-outlet duplicates.
    pub detached: BTreeSet<ItemId>,
    /// Previously existing ids that no longer have a valid group.
    pub dissolved: BTreeSet<GroupId>,
    /// Last-resort per-item labels, set only when no group survives. These
    /// are negative, in-memory only, and never persisted.
    pub provisional: BTreeMap<ItemId, GroupId>,
    pub candidate_clusters: usize,
    pub allocated: usize,
    pub subdivided: usize,
}

pub struct GroupReconciler {
    merge_similarity: f32,
    hot_merge_similarity: f32,
    hot_groups: BTreeSet<GroupId>,
    hot_alternative_min_support: usize,
    subdivision_min_size: usize,
    max_partition_k: usize,
}

/// Hands out `max(known) + 1`, `+ 2`, ... for the rest of the pass.
struct IdAllocator {
    next: GroupId,
    allocated: usize,
}

impl IdAllocator {
    fn new(known_max: Option<GroupId>, candidates: &[Candidate<'_>]) -> Self {
        let seen = candidates.iter().filter_map(|c| c.item.existing_group).max();
        let max = known_max.into_iter().chain(seen).max().unwrap_or(0);
        Self {
            next: max + 1,
            allocated: 0,
        }
    }

    fn allocate(&mut self) -> GroupId {
        let id = self.next;
        self.next += 1;
        self.allocated += 1;
        id
    }
}

impl GroupReconciler {
    pub fn new(config: &GroupingConfig) -> Self {
        Self {
            merge_similarity: config.merge_similarity,
            hot_merge_similarity: config.hot_merge_similarity,
            hot_groups: config.hot_groups.iter().copied().collect(),
            hot_alternative_min_support: config.hot_alternative_min_support,
            subdivision_min_size: config.subdivision_min_size,
            max_partition_k: config.max_partition_k,
        }
    }

    /// Reconcile one clustering pass. `known_max` is the highest group id the
    /// store has ever persisted.
    pub fn reconcile(
        &self,
        candidates: &[Candidate<'_>],
        known_max: Option<GroupId>,
    ) -> Reconciliation {
        let mut out = Reconciliation::default();
        let mut ids = IdAllocator::new(known_max, candidates);

        // Reference items start in their own group, everything else ungrouped.
        let mut target: Vec<Option<GroupId>> =
            candidates.iter().map(|c| c.item.existing_group).collect();

        let mut clusters: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (idx, c) in candidates.iter().enumerate() {
            if c.label != NOISE {
                clusters.entry(c.label).or_default().push(idx);
            }
        }
        out.candidate_clusters = clusters.len();

        for (label, members) in &clusters {
            for (idx, group_id) in self.assign_cluster(members, candidates, &mut ids, &mut out) {
                target[idx] = Some(group_id);
            }
            debug!(label, members = members.len(), "Cluster reconciled");
        }

        self.finalize(candidates, target, &mut out);

        if out.groups.is_empty() && !candidates.is_empty() {
            for (idx, c) in candidates.iter().enumerate() {
                out.provisional.insert(c.item.id.clone(), -(idx as GroupId) - 1);
            }
        }

        out.allocated = ids.allocated;
        info!(
            candidates = candidates.len(),
            clusters = out.candidate_clusters,
            groups = out.groups.len(),
            allocated = out.allocated,
            subdivided = out.subdivided,
            detached = out.detached.len(),
            dissolved = out.dissolved.len(),
            "Groups reconciled"
        );
        out
    }

    /// Decide ids for the members of one candidate cluster. Returns only the
    /// members whose target changes.
    fn assign_cluster(
        &self,
        members: &[usize],
        candidates: &[Candidate<'_>],
        ids: &mut IdAllocator,
        out: &mut Reconciliation,
    ) -> Vec<(usize, GroupId)> {
        let (refs, news): (Vec<usize>, Vec<usize>) = members
            .iter()
            .partition(|&&i| candidates[i].item.existing_group.is_some());

        // Nothing new: every reference keeps its group.
        if news.is_empty() {
            return Vec::new();
        }

        if refs.is_empty() {
            let id = ids.allocate();
            return news.iter().map(|&i| (i, id)).collect();
        }

        let votes = tally(&refs, candidates);
        let Some(winner) = leader(votes.iter().copied()) else {
            return Vec::new();
        };

        if !self.hot_groups.contains(&winner) {
            return self.join(winner, &news, &refs, candidates, ids, self.merge_similarity);
        }

        let alternative = leader(votes.iter().copied().filter(|(g, support)| {
            *g != winner
                && !self.hot_groups.contains(g)
                && *support >= self.hot_alternative_min_support
        }));
        if let Some(alt) = alternative {
            debug!(hot = winner, alternative = alt, "Avoiding hot group");
            return self.join(alt, &news, &refs, candidates, ids, self.merge_similarity);
        }

        let anchored = anchored_members(winner, &news, &refs, candidates);
        let vectors: Vec<&[f32]> = anchored.iter().map(|&i| candidates[i].vector).collect();
        if mean_pairwise_similarity(&vectors) <= self.hot_merge_similarity {
            let id = ids.allocate();
            debug!(hot = winner, new_group = id, "Cluster not coherent enough for hot group");
            return news.iter().map(|&i| (i, id)).collect();
        }

        let k = self.max_partition_k.min(anchored.len() / 2);
        if anchored.len() > self.subdivision_min_size && k >= 2 {
            out.subdivided += 1;
            let parts = partition(&vectors, k);
            let part_ids: Vec<GroupId> = (0..=parts.iter().copied().max().unwrap_or(0))
                .map(|_| ids.allocate())
                .collect();
            debug!(hot = winner, parts = part_ids.len(), "Subdividing hot group");
            return anchored
                .iter()
                .zip(parts)
                .map(|(&i, p)| (i, part_ids[p]))
                .collect();
        }

        news.iter().map(|&i| (i, winner)).collect()
    }

    /// New items follow `group_id` if the cluster (new items plus that group's
    /// anchors) is coherent, otherwise they get a fresh id.
    fn join(
        &self,
        group_id: GroupId,
        news: &[usize],
        refs: &[usize],
        candidates: &[Candidate<'_>],
        ids: &mut IdAllocator,
        threshold: f32,
    ) -> Vec<(usize, GroupId)> {
        let anchored = anchored_members(group_id, news, refs, candidates);
        let vectors: Vec<&[f32]> = anchored.iter().map(|&i| candidates[i].vector).collect();
        let id = if mean_pairwise_similarity(&vectors) > threshold {
            group_id
        } else {
            ids.allocate()
        };
        news.iter().map(|&i| (i, id)).collect()
    }

    /// Per-outlet dedup, minimum size, and bookkeeping of what changed.
    fn finalize(
        &self,
        candidates: &[Candidate<'_>],
        mut target: Vec<Option<GroupId>>,
        out: &mut Reconciliation,
    ) {
        let mut members: BTreeMap<GroupId, Vec<usize>> = BTreeMap::new();
        for (idx, group_id) in target.iter().enumerate() {
            if let Some(group_id) = group_id {
                members.entry(*group_id).or_default().push(idx);
            }
        }

        for (group_id, idxs) in members {
            let mut keep: BTreeMap<String, usize> = BTreeMap::new();
            for &idx in &idxs {
                let outlet = outlet_key(candidates[idx].item);
                match keep.get(&outlet) {
                    Some(&current) if !more_recent(candidates[idx].item, candidates[current].item) => {
                        target[idx] = None;
                        out.detached.insert(candidates[idx].item.id.clone());
                    }
                    Some(&current) => {
                        target[current] = None;
                        out.detached.insert(candidates[current].item.id.clone());
                        keep.insert(outlet, idx);
                    }
                    None => {
                        keep.insert(outlet, idx);
                    }
                }
            }

            if keep.len() < 2 {
                for &idx in keep.values() {
                    target[idx] = None;
                }
                debug!(group_id, outlets = keep.len(), "Group dissolved");
                continue;
            }

            out.groups.insert(
                group_id,
                keep.values().map(|&i| candidates[i].item.id.clone()).collect(),
            );
        }

        let previous: BTreeSet<GroupId> = candidates
            .iter()
            .filter_map(|c| c.item.existing_group)
            .collect();
        out.dissolved = previous
            .into_iter()
            .filter(|g| !out.groups.contains_key(g))
            .collect();

        for (c, group_id) in candidates.iter().zip(target) {
            out.assignments.insert(c.item.id.clone(), group_id);
        }
    }
}

/// Reference votes per existing id, in first-seen order.
fn tally(refs: &[usize], candidates: &[Candidate<'_>]) -> Vec<(GroupId, usize)> {
    let mut votes: Vec<(GroupId, usize)> = Vec::new();
    for group_id in refs.iter().filter_map(|&i| candidates[i].item.existing_group) {
        match votes.iter_mut().find(|(g, _)| *g == group_id) {
            Some((_, count)) => *count += 1,
            None => votes.push((group_id, 1)),
        }
    }
    votes
}

/// Highest support wins; ties go to the earliest entry.
fn leader(votes: impl Iterator<Item = (GroupId, usize)>) -> Option<GroupId> {
    let mut best: Option<(GroupId, usize)> = None;
    for (group_id, support) in votes {
        if best.map_or(true, |(_, s)| support > s) {
            best = Some((group_id, support));
        }
    }
    best.map(|(g, _)| g)
}

/// New items plus the references already in `group_id`, in index order.
fn anchored_members(
    group_id: GroupId,
    news: &[usize],
    refs: &[usize],
    candidates: &[Candidate<'_>],
) -> Vec<usize> {
    let mut members: Vec<usize> = refs
        .iter()
        .copied()
        .filter(|&i| candidates[i].item.existing_group == Some(group_id))
        .chain(news.iter().copied())
        .collect();
    members.sort_unstable();
    members
}

fn outlet_key(item: &Item) -> String {
    item.source_outlet.trim().to_lowercase()
}

fn recency(item: &Item) -> (DateTime<Utc>, DateTime<Utc>) {
    (item.published_at(), item.created_at)
}

/// Strictly newer; equal timestamps keep the earlier item.
fn more_recent(a: &Item, b: &Item) -> bool {
    recency(a) > recency(b)
}
