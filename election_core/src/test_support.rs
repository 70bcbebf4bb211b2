// A store wrapper that fails chosen operations a chosen number of times.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::*;
use crate::store::*;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Fault {
    Settings,
    SetClosed,
    CountVoters,
    CountFor,
    VoterByEmail,
    Nominee,
    /// The insert is refused.
    Insert,
    /// The insert happens, but the caller is told it failed.
    InsertLostAck,
    Increment,
    SetCount,
}

pub struct FlakyStore<S: ElectionStore> {
    pub inner: S,
    // fault -> (calls to let through first, calls to fail)
    faults: Mutex<HashMap<Fault, (usize, usize)>>,
    // Counter bumped right after the next clear, like an increment in flight.
    late_increment: Mutex<Option<NomineeId>>,
}

impl<S: ElectionStore> FlakyStore<S> {
    pub fn new(inner: S) -> FlakyStore<S> {
        FlakyStore {
            inner,
            faults: Mutex::new(HashMap::new()),
            late_increment: Mutex::new(None),
        }
    }

    /// The next clear is followed by an increment for this nominee.
    pub fn increment_after_clear(&self, id: &NomineeId) {
        *self.late_increment.lock().unwrap() = Some(id.clone());
    }

    /// The next `times` calls to the operation fail.
    pub fn inject(&self, fault: Fault, times: usize) {
        self.inject_after(fault, 0, times);
    }

    /// Lets `skip` calls through, then fails the next `times` calls.
    pub fn inject_after(&self, fault: Fault, skip: usize, times: usize) {
        let mut faults = self.faults.lock().unwrap();
        let entry = faults.entry(fault).or_insert((0, 0));
        entry.0 = skip;
        entry.1 += times;
    }

    fn trip(&self, fault: Fault, operation: &'static str) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(&fault) {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                Ok(())
            }
            Some((_, n)) if *n > 0 => {
                *n -= 1;
                Err(StoreError::Unavailable { operation })
            }
            _ => Ok(()),
        }
    }
}

impl<S: ElectionStore> ElectionStore for FlakyStore<S> {
    fn settings(&self) -> StoreResult<ElectionSettings> {
        self.trip(Fault::Settings, "settings")?;
        self.inner.settings()
    }

    fn set_closed(&self, closed: bool) -> StoreResult<bool> {
        self.trip(Fault::SetClosed, "set_closed")?;
        self.inner.set_closed(closed)
    }

    fn nominees(&self) -> StoreResult<Vec<Nominee>> {
        self.inner.nominees()
    }

    fn nominee(&self, id: &NomineeId) -> StoreResult<Option<Nominee>> {
        self.trip(Fault::Nominee, "nominee")?;
        self.inner.nominee(id)
    }

    fn count_voters(&self) -> StoreResult<u64> {
        self.trip(Fault::CountVoters, "count_voters")?;
        self.inner.count_voters()
    }

    fn count_voters_for(&self, id: &NomineeId) -> StoreResult<u64> {
        self.trip(Fault::CountFor, "count_voters_for")?;
        self.inner.count_voters_for(id)
    }

    fn voter_by_email(&self, email: &str) -> StoreResult<Option<Voter>> {
        self.trip(Fault::VoterByEmail, "voter_by_email")?;
        self.inner.voter_by_email(email)
    }

    fn voter_by_origin(&self, origin: &str) -> StoreResult<Option<Voter>> {
        self.inner.voter_by_origin(origin)
    }

    fn voters(&self) -> StoreResult<Vec<Voter>> {
        self.inner.voters()
    }

    fn insert_voter(&self, voter: NewVoter) -> Result<Voter, InsertError> {
        self.trip(Fault::Insert, "insert_voter")?;
        let row = self.inner.insert_voter(voter)?;
        self.trip(Fault::InsertLostAck, "insert_voter")?;
        Ok(row)
    }

    fn increment_vote_count(&self, id: &NomineeId) -> StoreResult<u64> {
        self.trip(Fault::Increment, "increment_vote_count")?;
        self.inner.increment_vote_count(id)
    }

    fn set_vote_count(&self, id: &NomineeId, value: u64) -> StoreResult<()> {
        self.trip(Fault::SetCount, "set_vote_count")?;
        self.inner.set_vote_count(id, value)
    }

    fn clear_ledger(&self) -> StoreResult<()> {
        self.inner.clear_ledger()?;
        if let Some(id) = self.late_increment.lock().unwrap().take() {
            self.inner.increment_vote_count(&id)?;
        }
        Ok(())
    }
}
