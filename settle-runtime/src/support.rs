//! Reference-counted bind output
//!
//! Several blocks may derive the same fact, and a derived fact may already
//! have been asserted directly. [`BindSupport`] counts, per database and
//! triple, how many blocks currently derive a fact and whether a derivation
//! is what put it in the store. A fact is added when its first supporter
//! appears and it is not already held. It is removed when its last
//! supporter goes, and only if a derivation added it.

use crate::action::Action;
use crate::block::{BindDelta, Facts};
use settle_types::Triple;
use std::collections::BTreeMap;

type FactKey = (String, Triple);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Support {
    count: usize,
    /// The store holds the fact because a derivation added it
    owned: bool,
}

/// Store actions for a batch of bind deltas, plus the counts they leave
#[derive(Debug, Clone, Default)]
pub(crate) struct SupportPlan {
    pub(crate) actions: Vec<Action>,
    updates: Vec<(FactKey, Option<Support>)>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BindSupport {
    facts: BTreeMap<FactKey, Support>,
}

impl BindSupport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.facts.len()
    }

    /// Work out the store actions for `delta` without recording it.
    ///
    /// Gains and losses of the same fact within one delta cancel, so a
    /// derivation moving between blocks never touches the store. `facts`
    /// decides whether a newly supported fact is already held.
    pub(crate) fn plan(&self, delta: &BindDelta, facts: &dyn Facts) -> SupportPlan {
        let mut net: BTreeMap<&FactKey, isize> = BTreeMap::new();
        for key in &delta.lost {
            *net.entry(key).or_default() -= 1;
        }
        for key in &delta.gained {
            *net.entry(key).or_default() += 1;
        }

        let mut plan = SupportPlan::default();
        for (key, change) in net {
            if change == 0 {
                continue;
            }
            let (db, triple) = key;
            let before = self.facts.get(key).copied();
            let count = before.map_or(0, |s| s.count as isize) + change;

            if count > 0 {
                let owned = match before {
                    Some(support) => support.owned,
                    None => {
                        let held = facts.contains(db, triple);
                        if !held {
                            plan.actions.push(Action::Add {
                                db: db.clone(),
                                triple: triple.clone(),
                            });
                        }
                        !held
                    }
                };
                let support = Support {
                    count: count as usize,
                    owned,
                };
                plan.updates.push((key.clone(), Some(support)));
                continue;
            }

            if count < 0 {
                tracing::warn!(%db, %triple, "bind support dropped below zero");
            }
            if let Some(support) = before {
                if support.owned {
                    plan.actions.push(Action::Remove {
                        db: db.clone(),
                        triple: triple.clone(),
                    });
                } else {
                    tracing::trace!(%db, %triple, "support gone; fact was asserted directly");
                }
                plan.updates.push((key.clone(), None));
            }
        }
        plan
    }

    /// Record the counts of a plan whose actions were committed.
    pub(crate) fn apply(&mut self, plan: SupportPlan) {
        for (key, support) in plan.updates {
            match support {
                Some(support) => {
                    self.facts.insert(key, support);
                }
                None => {
                    self.facts.remove(&key);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.facts.clear();
    }
}
