//! Episode context: the bookkeeping a caller keeps around an assigner.
//!
//! An [`Episode`] owns the assigner for one run together with the value
//! matrix, the set of items already picked, the running total and the pick
//! history. Items are identified by their row in the value matrix, which is
//! also the item type passed to the policy.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::assigner::{Assignment, SequentialAssigner};
use crate::error::{Error, Result};
use crate::types::ValueMatrix;

/// One committed pick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Pick {
    pub item: usize,
    pub slot: usize,
    pub label: String,
    pub value: f64,
    pub fallback: bool,
}

/// Policy recommendation for an item that has not been picked yet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Suggestion {
    pub item: usize,
    pub slot: usize,
    pub value: f64,
}

pub struct Episode {
    assigner: SequentialAssigner,
    values: Arc<ValueMatrix>,
    used: HashSet<usize>,
    total: f64,
    picks: Vec<Pick>,
}

impl Episode {
    /// Start an episode. The assigner is reset so the episode begins with
    /// every slot free.
    ///
    /// The value matrix is expected to have one row per item type and one
    /// column per slot; this is not cross-checked against the policy, but
    /// every lookup is range-checked.
    pub fn new(mut assigner: SequentialAssigner, values: Arc<ValueMatrix>) -> Self {
        assigner.reset();
        Self {
            assigner,
            values,
            used: HashSet::new(),
            total: 0.0,
            picks: Vec::new(),
        }
    }

    /// Assign `item` and credit its value for the chosen slot.
    ///
    /// Fails without changing anything if the item was already picked, the
    /// episode is finished, the item is unknown to the policy, or the chosen
    /// slot has no value for this item.
    pub fn pick(&mut self, item: usize) -> Result<&Pick> {
        if self.used.contains(&item) {
            return Err(Error::AlreadyUsed { item });
        }
        let slot = self.assigner.recommend(item)?;
        let value = self.values.try_get(item, slot)?;

        let Assignment { slot, fallback, .. } = self.assigner.assign_next(item)?;
        let label = self.assigner.pretty(slot)?;

        self.used.insert(item);
        self.total += value;
        info!(item, slot = %label, value, total = self.total, "pick");
        self.picks.push(Pick {
            item,
            slot,
            label,
            value,
            fallback,
        });
        Ok(&self.picks[self.picks.len() - 1])
    }

    /// Unpicked items ranked by the value of the slot the policy would give
    /// them now, best first; ties keep item order. At most `limit` entries.
    pub fn suggestions(&self, limit: usize) -> Vec<Suggestion> {
        if self.assigner.is_finished() {
            return Vec::new();
        }
        let mut out: Vec<Suggestion> = (0..self.values.rows())
            .filter(|item| !self.used.contains(item))
            .filter_map(|item| {
                let slot = self.assigner.recommend(item).ok()?;
                let value = self.values.try_get(item, slot).ok()?;
                Some(Suggestion { item, slot, value })
            })
            .collect();
        out.sort_by(|a, b| b.value.total_cmp(&a.value));
        out.truncate(limit);
        out
    }

    /// Start over with the same policy and values.
    pub fn reset(&mut self) {
        self.assigner.reset();
        self.used.clear();
        self.total = 0.0;
        self.picks.clear();
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn picks(&self) -> &[Pick] {
        &self.picks
    }

    pub fn is_used(&self, item: usize) -> bool {
        self.used.contains(&item)
    }

    pub fn is_finished(&self) -> bool {
        self.assigner.is_finished()
    }

    pub fn categories_left(&self) -> Vec<usize> {
        self.assigner.categories_left()
    }

    pub fn assigner(&self) -> &SequentialAssigner {
        &self.assigner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyTable;

    /// 2 slots, 3 types. Full mask: types 0 and 2 go to slot 1, type 1 to slot 0.
    fn episode() -> Episode {
        let policy = PolicyTable::from_rows(&[
            vec![0, 0, 0],
            vec![0, 0, 0],
            vec![1, 1, 1],
            vec![1, 0, 1],
        ])
        .unwrap();
        let assigner =
            SequentialAssigner::new(Arc::new(policy), Some(vec!["A".into(), "B".into()]))
                .unwrap();
        let values = ValueMatrix::from_rows(vec![
            vec![1.0, 4.0],
            vec![6.0, 2.0],
            vec![3.0, 7.0],
        ])
        .unwrap();
        Episode::new(assigner, Arc::new(values))
    }

    #[test]
    fn test_pick_accumulates() {
        let mut ep = episode();
        let p = ep.pick(1).unwrap().clone();
        assert_eq!(p.slot, 0);
        assert_eq!(p.label, "A");
        assert_eq!(p.value, 6.0);
        assert!(ep.is_used(1));
        assert_eq!(ep.categories_left(), vec![1]);

        let p = ep.pick(2).unwrap().clone();
        assert_eq!(p.slot, 1);
        assert_eq!(ep.total(), 13.0);
        assert!(ep.is_finished());
        assert_eq!(ep.picks().len(), 2);
    }

    #[test]
    fn test_duplicate_item_rejected() {
        let mut ep = episode();
        ep.pick(0).unwrap();
        assert!(matches!(ep.pick(0), Err(Error::AlreadyUsed { item: 0 })));
        assert_eq!(ep.total(), 4.0);
        assert_eq!(ep.categories_left(), vec![0]);
    }

    #[test]
    fn test_unknown_item_leaves_state() {
        let mut ep = episode();
        assert!(matches!(ep.pick(5), Err(Error::Range { .. })));
        assert!(!ep.is_used(5));
        assert_eq!(ep.total(), 0.0);
        assert_eq!(ep.categories_left(), vec![0, 1]);
    }

    #[test]
    fn test_pick_after_finish() {
        let mut ep = episode();
        ep.pick(0).unwrap();
        ep.pick(1).unwrap();
        assert!(matches!(ep.pick(2), Err(Error::Exhausted)));
    }

    #[test]
    fn test_suggestions_ranked() {
        let ep = episode();
        let s = ep.suggestions(10);
        // type 0 -> slot 1 (4.0), type 1 -> slot 0 (6.0), type 2 -> slot 1 (7.0)
        let items: Vec<usize> = s.iter().map(|x| x.item).collect();
        assert_eq!(items, vec![2, 1, 0]);
        assert_eq!(s[0].value, 7.0);

        assert_eq!(ep.suggestions(1).len(), 1);
    }

    #[test]
    fn test_suggestions_skip_used_and_finish() {
        let mut ep = episode();
        ep.pick(2).unwrap();
        let s = ep.suggestions(10);
        assert!(s.iter().all(|x| x.item != 2));
        assert!(s.iter().all(|x| x.slot == 0));
        ep.pick(1).unwrap();
        assert!(ep.suggestions(10).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut ep = episode();
        ep.pick(0).unwrap();
        ep.reset();
        assert_eq!(ep.total(), 0.0);
        assert!(ep.picks().is_empty());
        assert!(!ep.is_used(0));
        assert_eq!(ep.categories_left(), vec![0, 1]);
    }
}
