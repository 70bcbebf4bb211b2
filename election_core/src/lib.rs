mod config;
pub mod guard;
pub mod manual;
pub mod results;
pub mod state;
pub mod store;
pub mod tally;
pub mod validation;

#[cfg(test)]
mod test_support;

use log::{debug, error, info, warn};

pub use crate::config::*;
pub use crate::guard::{normalize_email, resolve_origin, DuplicateReason, UNKNOWN_ORIGIN};
pub use crate::results::{ElectionResults, NomineeStanding};
pub use crate::state::CloseOutcome;
pub use crate::store::{ElectionStore, InsertError, MemoryStore, StoreError, UniqueKey};
pub use crate::tally::{TallyDiscrepancy, TallyOutcome};

use crate::guard::DuplicateGuard;
use crate::state::ElectionState;
use crate::tally::Tally;
use crate::validation::validate_submission;

/// Runs one election on top of a store.
///
/// The core keeps no state between calls: everything is read from and
/// written to the store, so any number of threads may cast votes through
/// the same instance.
///
/// ```
/// use election_core::*;
///
/// let store = MemoryStore::new(
///     vec![Nominee::new("n1", "Ada"), Nominee::new("n2", "Grace")],
///     ElectionSettings::new(60),
/// );
/// let core = ElectionCore::new(store);
/// let submission = VoteSubmission {
///     name: "Alan".to_string(),
///     email: "alan@example.com".to_string(),
///     phone: None,
///     nominee_id: NomineeId::new("n2"),
/// };
/// let receipt = core.cast_vote(&submission, "203.0.113.7")?;
/// assert_eq!(receipt.vote_count, Some(1));
///
/// # Ok::<(), VoteRejection>(())
/// ```
pub struct ElectionCore<S: ElectionStore> {
    store: S,
    limits: SubmissionLimits,
}

impl<S: ElectionStore> ElectionCore<S> {
    pub fn new(store: S) -> ElectionCore<S> {
        ElectionCore {
            store,
            limits: SubmissionLimits::DEFAULT,
        }
    }

    pub fn with_limits(self, limits: SubmissionLimits) -> ElectionCore<S> {
        ElectionCore { limits, ..self }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Casts one vote.
    ///
    /// Arguments:
    /// * `submission` the raw fields sent by the voter
    /// * `origin` the network origin of the submission, see [`resolve_origin`]
    ///
    /// The submission is either fully accepted or rejected with the first
    /// failing check. Once the voter row is stored, the vote is reported as
    /// accepted whatever happens to the counters afterwards.
    pub fn cast_vote(
        &self,
        submission: &VoteSubmission,
        origin: &str,
    ) -> Result<VoteReceipt, VoteRejection> {
        let checked = validate_submission(submission, &self.limits).map_err(|r| {
            debug!("cast_vote: invalid submission: {}", r);
            r
        })?;

        let state = ElectionState::new(&self.store);
        let settings = state
            .settings()
            .map_err(|e| store_fault("reading settings", e))?;
        if settings.is_closed {
            debug!("cast_vote: election closed, rejecting {}", checked.email);
            return Err(VoteRejection::closed());
        }

        let total = self
            .store
            .count_voters()
            .map_err(|e| store_fault("counting voters", e))?;
        if total >= settings.max_votes {
            info!(
                "cast_vote: cap reached ({} >= {}), closing the election",
                total, settings.max_votes
            );
            if let Err(e) = state.close() {
                warn!("cast_vote: auto-close failed: {}", e);
            }
            return Err(VoteRejection::cap_reached());
        }

        let guard = DuplicateGuard::new(&self.store);
        match guard
            .check(&checked.email, origin)
            .map_err(|e| store_fault("checking duplicates", e))?
        {
            Some(DuplicateReason::Email) => return Err(VoteRejection::duplicate_email()),
            Some(DuplicateReason::Origin) => return Err(VoteRejection::duplicate_origin()),
            None => {}
        }

        if self
            .store
            .nominee(&checked.nominee_id)
            .map_err(|e| store_fault("reading nominee", e))?
            .is_none()
        {
            debug!("cast_vote: unknown nominee {}", checked.nominee_id);
            return Err(VoteRejection::invalid_nominee());
        }

        let voter = NewVoter {
            name: checked.name,
            email: checked.email,
            phone: checked.phone,
            origin: origin.to_string(),
            nominee_id: checked.nominee_id,
        };
        let row = match self.store.insert_voter(voter) {
            Ok(row) => row,
            Err(InsertError::Conflict(key)) => {
                // A concurrent submission got there first.
                debug!("cast_vote: insert lost the race on {:?}", key);
                return Err(match key {
                    UniqueKey::Email => VoteRejection::duplicate_email(),
                    UniqueKey::Origin => VoteRejection::duplicate_origin(),
                });
            }
            Err(InsertError::Store(StoreError::UnknownNominee(id))) => {
                debug!("cast_vote: store does not know nominee {}", id);
                return Err(VoteRejection::invalid_nominee());
            }
            Err(InsertError::Store(e)) => {
                return Err(match store_fault("inserting voter", e) {
                    r if r.kind == RejectionKind::StorageFailure => {
                        VoteRejection::storage_failure()
                    }
                    r => r,
                })
            }
        };
        info!("cast_vote: recorded voter {} for {}", row.id, row.nominee_id);

        // From here on the vote is durable: nothing below may turn it into a rejection.
        let tally_outcome = Tally::new(&self.store).record(&row.nominee_id);

        let (total_votes, election_closed) = match self.store.count_voters() {
            Ok(new_total) if new_total >= settings.max_votes => {
                info!(
                    "cast_vote: cap reached after voter {} ({} >= {})",
                    row.id, new_total, settings.max_votes
                );
                if let Err(e) = state.close() {
                    warn!("cast_vote: auto-close after vote failed: {}", e);
                }
                (Some(new_total), true)
            }
            Ok(new_total) => (Some(new_total), false),
            Err(e) => {
                warn!("cast_vote: could not re-check the cap: {}", e);
                (None, false)
            }
        };

        Ok(VoteReceipt {
            voter_id: row.id,
            nominee_id: row.nominee_id,
            vote_count: tally_outcome.count(),
            total_votes,
            election_closed,
        })
    }

    /// Administrative close. Closing twice is not an error.
    pub fn close(&self) -> Result<CloseOutcome, VoteRejection> {
        ElectionState::new(&self.store)
            .close()
            .map_err(|e| store_fault("closing the election", e))
    }

    /// Administrative reset: removes every vote, zeroes the counters and
    /// reopens the election.
    pub fn reset(&self) -> Result<(), VoteRejection> {
        self.store
            .clear_ledger()
            .map_err(|e| store_fault("clearing the ledger", e))?;
        ElectionState::new(&self.store)
            .reopen()
            .map_err(|e| store_fault("reopening the election", e))?;
        // Increments in flight during the clear may have left a counter behind.
        match Tally::new(&self.store).repair_all() {
            Ok(drift) if !drift.is_empty() => {
                info!("reset: repaired {} counters after clearing", drift.len())
            }
            Ok(_) => {}
            Err(e) => warn!("reset: could not check the counters: {}", e),
        }
        info!("reset: election cleared and reopened");
        Ok(())
    }

    pub fn results(&self) -> Result<ElectionResults, VoteRejection> {
        results::collect_results(&self.store).map_err(|e| store_fault("reading results", e))
    }

    /// All the voter rows, newest first.
    pub fn voters(&self) -> Result<Vec<Voter>, VoteRejection> {
        self.store
            .voters()
            .map_err(|e| store_fault("listing voters", e))
    }

    /// Lists the counters that disagree with the voter rows.
    pub fn audit(&self) -> Result<Vec<TallyDiscrepancy>, VoteRejection> {
        Tally::new(&self.store)
            .audit()
            .map_err(|e| store_fault("auditing the tally", e))
    }

    /// Recounts the counters that disagree with the voter rows.
    pub fn repair(&self) -> Result<Vec<TallyDiscrepancy>, VoteRejection> {
        Tally::new(&self.store)
            .repair_all()
            .map_err(|e| store_fault("repairing the tally", e))
    }
}

// Store errors become a retryable storage failure, except those that
// reveal a bug or a broken state.
fn store_fault(context: &str, e: StoreError) -> VoteRejection {
    match e {
        StoreError::Poisoned | StoreError::Corrupt(_) => {
            error!("{}: {}", context, e);
            VoteRejection::internal_fault()
        }
        _ => {
            warn!("{}: {}", context, e);
            VoteRejection::storage_unavailable()
        }
    }
}
