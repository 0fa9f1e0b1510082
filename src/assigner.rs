//! Online slot assignment driven by a precomputed policy.
//!
//! The assigner's state is a free-slot bitmask. Each arrival looks up
//! `policy[free_mask][item_type]`, validates that the proposed slot is still
//! free, and clears exactly one bit. The mask never gains bits except through
//! [`SequentialAssigner::reset`], which starts a new episode.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::storage::load_policy;
use crate::types::PolicyTable;

/// Outcome of one [`SequentialAssigner::assign_next`] call.
///
/// Displays as the slot label when the assigner has slot names, otherwise as
/// the slot index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub slot: usize,
    pub label: Option<Arc<str>>,
    /// The policy proposed an occupied slot and the smallest free slot was
    /// used instead.
    pub fallback: bool,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => f.write_str(label),
            None => write!(f, "{}", self.slot),
        }
    }
}

/// Per-episode assignment state over a shared policy.
///
/// Not meant for concurrent mutation: run one assigner per episode. Any number
/// of assigners may share one `Arc<PolicyTable>`.
#[derive(Clone, Debug)]
pub struct SequentialAssigner {
    policy: Arc<PolicyTable>,
    free_mask: u32,
    slot_names: Option<Vec<Arc<str>>>,
}

impl SequentialAssigner {
    /// Start an episode with every slot free.
    ///
    /// `slot_names`, if given, must have exactly `policy.slot_count()` entries.
    pub fn new(policy: Arc<PolicyTable>, slot_names: Option<Vec<String>>) -> Result<Self> {
        let slot_names = match slot_names {
            Some(names) if names.len() != policy.slot_count() => {
                return Err(Error::format(format!(
                    "got {} slot names for {} slots",
                    names.len(),
                    policy.slot_count()
                )))
            }
            Some(names) => Some(names.into_iter().map(Arc::from).collect()),
            None => None,
        };
        Ok(Self {
            free_mask: policy.full_mask(),
            policy,
            slot_names,
        })
    }

    /// Load a policy artifact and start an episode over it.
    pub fn from_policy(path: impl AsRef<Path>, slot_names: Option<Vec<String>>) -> Result<Self> {
        let policy = load_policy(path)?;
        Self::new(Arc::new(policy), slot_names)
    }

    /// Mark every slot free again. The policy is kept.
    pub fn reset(&mut self) {
        self.free_mask = self.policy.full_mask();
    }

    #[inline]
    pub fn free_mask(&self) -> u32 {
        self.free_mask
    }

    pub fn policy(&self) -> &Arc<PolicyTable> {
        &self.policy
    }

    pub fn slot_count(&self) -> usize {
        self.policy.slot_count()
    }

    pub fn slot_names(&self) -> Option<&[Arc<str>]> {
        self.slot_names.as_deref()
    }

    /// Free slot indices, ascending.
    pub fn categories_left(&self) -> Vec<usize> {
        slots_in_mask(self.free_mask, self.slot_count()).collect()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.free_mask == 0
    }

    /// Validate `item_type` and resolve the slot the next arrival of that type
    /// would take, with the fallback already applied. Does not mutate.
    fn resolve(&self, item_type: usize) -> Result<(usize, bool)> {
        if self.free_mask == 0 {
            return Err(Error::Exhausted);
        }
        let type_count = self.policy.type_count();
        if item_type >= type_count {
            return Err(Error::Range {
                what: "item type",
                index: item_type,
                len: type_count,
            });
        }

        let proposed = self.policy.get(self.free_mask, item_type);
        if is_slot_free(self.free_mask, proposed) {
            return Ok((proposed, false));
        }

        // Policy and state disagree: take the smallest free slot.
        let fallback = slots_in_mask(self.free_mask, self.slot_count())
            .next()
            .ok_or(Error::Exhausted)?;
        Ok((fallback, true))
    }

    /// Slot the policy would assign to `item_type` right now.
    pub fn recommend(&self, item_type: usize) -> Result<usize> {
        self.resolve(item_type).map(|(slot, _)| slot)
    }

    /// Assign the next arrival of `item_type` and occupy its slot.
    ///
    /// Fails with [`Error::Exhausted`] once every slot is used and with
    /// [`Error::Range`] for an unknown type; the state is unchanged on error.
    pub fn assign_next(&mut self, item_type: usize) -> Result<Assignment> {
        let (slot, fallback) = self.resolve(item_type)?;
        if fallback {
            warn!(
                free_mask = self.free_mask,
                item_type,
                proposed = self.policy.get(self.free_mask, item_type),
                slot,
                "policy proposed an occupied slot, using smallest free slot"
            );
        }

        self.free_mask &= !(1u32 << slot);
        debug!(item_type, slot, free_mask = self.free_mask, "assigned");

        Ok(Assignment {
            slot,
            label: self.slot_names.as_ref().map(|n| n[slot].clone()),
            fallback,
        })
    }

    /// Human label for `slot`: its name if slot names were given, otherwise
    /// the index as a string.
    pub fn pretty(&self, slot: usize) -> Result<String> {
        if slot >= self.slot_count() {
            return Err(Error::Range {
                what: "slot",
                index: slot,
                len: self.slot_count(),
            });
        }
        Ok(match &self.slot_names {
            Some(names) => names[slot].to_string(),
            None => slot.to_string(),
        })
    }
}
