use log::{debug, info, warn};

use serde::Serialize;

use crate::config::NomineeId;
use crate::store::{ElectionStore, StoreResult};

/// What happened to the counter after a vote was recorded.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TallyOutcome {
    /// The atomic increment succeeded. Holds the new count.
    Incremented(u64),
    /// The increment failed and the counter was recomputed from the voter rows.
    Repaired(u64),
    /// Both the increment and the repair failed. The counter is stale until
    /// the next repair.
    Unrepaired,
}

impl TallyOutcome {
    pub fn count(&self) -> Option<u64> {
        match self {
            TallyOutcome::Incremented(c) | TallyOutcome::Repaired(c) => Some(*c),
            TallyOutcome::Unrepaired => None,
        }
    }
}

/// A nominee whose cached counter disagrees with the voter rows.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct TallyDiscrepancy {
    pub nominee_id: NomineeId,
    pub cached: u64,
    pub recorded: u64,
}

/// The per-nominee vote counters.
///
/// Counters are a cache over the voter rows. They move forward through the
/// store's atomic increment, and are repaired by recounting the rows. A
/// recount sets the counter, it never adjusts it, so it can be run any
/// number of times.
pub struct Tally<'a, S: ElectionStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ElectionStore + ?Sized> Tally<'a, S> {
    pub fn new(store: &'a S) -> Tally<'a, S> {
        Tally { store }
    }

    pub fn increment(&self, id: &NomineeId) -> StoreResult<u64> {
        self.store.increment_vote_count(id)
    }

    /// Sets the counter to the number of voter rows referencing the nominee.
    ///
    /// The count and the store are two steps. A vote recorded in between is
    /// overwritten and the counter ends one low until `repair_all` runs.
    pub fn recount(&self, id: &NomineeId) -> StoreResult<u64> {
        let recorded = self.store.count_voters_for(id)?;
        self.store.set_vote_count(id, recorded)?;
        debug!("Tally::recount: {} -> {}", id, recorded);
        Ok(recorded)
    }

    /// Counts a vote that is already recorded in the voter rows.
    ///
    /// Never fails: the vote is durable whatever happens to the counter.
    pub fn record(&self, id: &NomineeId) -> TallyOutcome {
        match self.increment(id) {
            Ok(c) => TallyOutcome::Incremented(c),
            Err(e) => {
                warn!("Tally::record: increment failed for {}: {}, recounting", id, e);
                match self.recount(id) {
                    Ok(c) => TallyOutcome::Repaired(c),
                    Err(e2) => {
                        warn!("Tally::record: recount failed for {}: {}", id, e2);
                        TallyOutcome::Unrepaired
                    }
                }
            }
        }
    }

    /// Compares every counter with the voter rows.
    pub fn audit(&self) -> StoreResult<Vec<TallyDiscrepancy>> {
        let mut res: Vec<TallyDiscrepancy> = Vec::new();
        for n in self.store.nominees()? {
            let recorded = self.store.count_voters_for(&n.id)?;
            if recorded != n.vote_count {
                res.push(TallyDiscrepancy {
                    nominee_id: n.id,
                    cached: n.vote_count,
                    recorded,
                });
            }
        }
        Ok(res)
    }

    /// Recounts every nominee that drifted. Returns what was repaired.
    pub fn repair_all(&self) -> StoreResult<Vec<TallyDiscrepancy>> {
        let drifted = self.audit()?;
        for d in drifted.iter() {
            info!(
                "Tally::repair_all: {} cached {} recorded {}",
                d.nominee_id, d.cached, d.recorded
            );
            self.recount(&d.nominee_id)?;
        }
        Ok(drifted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::store::MemoryStore;
    use crate::test_support::{Fault, FlakyStore};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new(
            vec![Nominee::new("n1", "Ada"), Nominee::new("n2", "Grace")],
            ElectionSettings::new(10),
        );
        for (idx, nominee) in ["n1", "n1", "n2"].iter().enumerate() {
            store
                .insert_voter(NewVoter {
                    name: format!("voter {}", idx),
                    email: format!("v{}@x.com", idx),
                    phone: None,
                    origin: format!("10.0.0.{}", idx),
                    nominee_id: NomineeId::new(*nominee),
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn recount_is_idempotent() {
        let store = seeded_store();
        let tally = Tally::new(&store);
        let n1 = NomineeId::new("n1");
        store.set_vote_count(&n1, 17).unwrap();
        assert_eq!(tally.recount(&n1).unwrap(), 2);
        assert_eq!(tally.recount(&n1).unwrap(), 2);
        assert_eq!(store.nominee(&n1).unwrap().unwrap().vote_count, 2);
    }

    #[test]
    fn record_falls_back_to_recount() {
        let store = FlakyStore::new(seeded_store());
        store.inject(Fault::Increment, 1);
        let tally = Tally::new(&store);
        assert_eq!(tally.record(&NomineeId::new("n2")), TallyOutcome::Repaired(1));
        assert_eq!(tally.record(&NomineeId::new("n2")), TallyOutcome::Incremented(2));
    }

    #[test]
    fn record_reports_unrepaired_when_everything_fails() {
        let store = FlakyStore::new(seeded_store());
        store.inject(Fault::Increment, 1);
        store.inject(Fault::CountFor, 1);
        let tally = Tally::new(&store);
        assert_eq!(tally.record(&NomineeId::new("n1")), TallyOutcome::Unrepaired);
        assert_eq!(TallyOutcome::Unrepaired.count(), None);
    }

    #[test]
    fn audit_and_repair_all() {
        let store = seeded_store();
        let tally = Tally::new(&store);
        // The seeded rows were never counted.
        let drift = tally.audit().unwrap();
        assert_eq!(drift.len(), 2);
        assert_eq!(
            drift[0],
            TallyDiscrepancy {
                nominee_id: NomineeId::new("n1"),
                cached: 0,
                recorded: 2,
            }
        );
        assert_eq!(tally.repair_all().unwrap().len(), 2);
        assert!(tally.audit().unwrap().is_empty());
        assert!(tally.repair_all().unwrap().is_empty());
    }
}
