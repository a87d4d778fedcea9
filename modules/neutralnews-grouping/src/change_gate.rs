use std::collections::BTreeSet;

use neutralnews_common::config::ChangeGateConfig;
use neutralnews_common::ItemId;

/// What to do with a group's synthesis this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// No aggregate exists yet.
    Create,
    /// Membership moved enough to regenerate.
    Update,
    /// Leave the aggregate untouched. `departed` lists ids from the last
    /// synthesis that are no longer members.
    Skip { departed: Vec<ItemId> },
}

/// Decides whether a group's membership change warrants re-synthesis.
/// Never alters membership.
#[derive(Debug, Clone)]
pub struct ChangeGate {
    ratio_threshold: f64,
    boundaries: Vec<usize>,
}

impl ChangeGate {
    pub fn new(config: &ChangeGateConfig) -> Self {
        let mut boundaries = config.bucket_boundaries.clone();
        boundaries.sort_unstable();
        boundaries.dedup();
        Self {
            ratio_threshold: config.change_ratio_threshold,
            boundaries,
        }
    }

    pub fn decide(&self, previous: Option<&[ItemId]>, current: &BTreeSet<ItemId>) -> GateDecision {
        let Some(previous) = previous else {
            return GateDecision::Create;
        };
        let old: BTreeSet<&ItemId> = previous.iter().collect();
        let new: BTreeSet<&ItemId> = current.iter().collect();

        let ratio = change_ratio(&old, &new);
        if ratio < self.ratio_threshold && !self.significant_increase(old.len(), new.len()) {
            let departed = old.difference(&new).map(|id| (*id).clone()).collect();
            return GateDecision::Skip { departed };
        }
        GateDecision::Update
    }

    /// True when the count moves from inside a bucket `[lo, hi)` to `hi` or
    /// beyond, for any consecutive pair of boundaries.
    pub fn significant_increase(&self, old_count: usize, new_count: usize) -> bool {
        self.boundaries
            .windows(2)
            .any(|w| old_count >= w[0] && old_count < w[1] && new_count >= w[1])
    }
}

/// `|old △ new| / max(|old|, 1)`.
pub fn change_ratio<T: Ord>(old: &BTreeSet<T>, new: &BTreeSet<T>) -> f64 {
    let changed = old.symmetric_difference(new).count();
    changed as f64 / old.len().max(1) as f64
}
