//! The durable store contract, and an in-process implementation of it.
//!
//! All the shared state of an election lives behind [`ElectionStore`]. The
//! orchestrator holds no state of its own: two guarantees are expected from
//! the store.
//!
//! * uniqueness of the normalized email and, separately, of the origin
//!   across voter rows, enforced by [`ElectionStore::insert_voter`] itself;
//! * an atomic increment for the per-nominee counters.
//!
//! Every operation is bounded in time. A store that cannot answer in time
//! returns [`StoreError::Timeout`] instead of hanging.

use log::{debug, info, warn};

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::*;

/// A failed store operation. All of them are transient from the point of
/// view of a caller: retrying the operation later is safe.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StoreError {
    /// The operation could not complete within the store's time bound.
    Timeout { operation: &'static str },
    /// A previous operation panicked while holding the store.
    Poisoned,
    /// The store does not know about this nominee.
    UnknownNominee(NomineeId),
    /// Persisting the state failed. The in-memory state was left untouched.
    Io(String),
    /// The persisted state could not be interpreted.
    Corrupt(String),
    /// The store refused to serve the operation.
    Unavailable { operation: &'static str },
}

impl Error for StoreError {}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout { operation } => write!(f, "store timeout during {}", operation),
            StoreError::Poisoned => write!(f, "store lock poisoned"),
            StoreError::UnknownNominee(id) => write!(f, "unknown nominee {}", id),
            StoreError::Io(msg) => write!(f, "store persistence failed: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "store state is corrupt: {}", msg),
            StoreError::Unavailable { operation } => {
                write!(f, "store unavailable for {}", operation)
            }
        }
    }
}

/// The unique keys of the voter rows.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum UniqueKey {
    Email,
    Origin,
}

/// Failure of [`ElectionStore::insert_voter`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum InsertError {
    /// Another row already holds this key. The row was not inserted.
    Conflict(UniqueKey),
    Store(StoreError),
}

impl Error for InsertError {}

impl Display for InsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsertError::Conflict(UniqueKey::Email) => write!(f, "email already recorded"),
            InsertError::Conflict(UniqueKey::Origin) => write!(f, "origin already recorded"),
            InsertError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl From<StoreError> for InsertError {
    fn from(e: StoreError) -> Self {
        InsertError::Store(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The operations the election core needs from its durable store.
pub trait ElectionStore: Send + Sync {
    /// Reads the settings row.
    fn settings(&self) -> StoreResult<ElectionSettings>;

    /// Updates the closed flag and returns its previous value.
    fn set_closed(&self, closed: bool) -> StoreResult<bool>;

    /// All the nominees, in configured order, with their cached counts.
    fn nominees(&self) -> StoreResult<Vec<Nominee>>;

    fn nominee(&self, id: &NomineeId) -> StoreResult<Option<Nominee>>;

    /// The number of voter rows.
    fn count_voters(&self) -> StoreResult<u64>;

    /// The number of voter rows referencing this nominee.
    fn count_voters_for(&self, id: &NomineeId) -> StoreResult<u64>;

    fn voter_by_email(&self, email: &str) -> StoreResult<Option<Voter>>;

    fn voter_by_origin(&self, origin: &str) -> StoreResult<Option<Voter>>;

    /// All the voter rows, newest first.
    fn voters(&self) -> StoreResult<Vec<Voter>>;

    /// Inserts a voter row.
    ///
    /// Fails with [`InsertError::Conflict`] if a row with the same email or the
    /// same origin exists. The check and the insert are one atomic step.
    fn insert_voter(&self, voter: NewVoter) -> Result<Voter, InsertError>;

    /// Atomically adds one to the nominee's counter and returns the new value.
    fn increment_vote_count(&self, id: &NomineeId) -> StoreResult<u64>;

    /// Overwrites the nominee's counter.
    fn set_vote_count(&self, id: &NomineeId, value: u64) -> StoreResult<()>;

    /// Removes every voter row and zeroes every counter.
    fn clear_ledger(&self) -> StoreResult<()>;
}

// **** In-process store ****

const LOCK_RETRY_INTERVAL: Duration = Duration::from_micros(50);

struct NomineeSlot {
    nominee: Nominee,
    count: AtomicU64,
}

// Voter rows and the settings row. The unique indexes point into `voters`.
#[derive(Default)]
struct Ledger {
    settings: ElectionSettings,
    voters: Vec<Voter>,
    by_email: HashMap<String, usize>,
    by_origin: HashMap<String, usize>,
    next_sequence: u64,
}

impl Ledger {
    fn push(&mut self, voter: Voter) {
        let idx = self.voters.len();
        self.by_email.insert(voter.email.clone(), idx);
        self.by_origin.insert(voter.origin.clone(), idx);
        self.voters.push(voter);
        self.next_sequence += 1;
    }

    // Undoes the last push.
    fn pop(&mut self) {
        if let Some(voter) = self.voters.pop() {
            self.by_email.remove(&voter.email);
            self.by_origin.remove(&voter.origin);
            self.next_sequence -= 1;
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    settings: ElectionSettings,
    nominees: Vec<Nominee>,
    voters: Vec<Voter>,
    next_sequence: u64,
}

/// An [`ElectionStore`] living in process memory, optionally mirrored to a
/// JSON snapshot file.
///
/// Voter rows and settings share one lock, which makes the uniqueness
/// check and the insert a single critical section. The counters are
/// atomics outside of that lock.
///
/// When a snapshot file is configured, every change to the rows or the
/// settings is written to disk before it becomes visible. A failed write
/// leaves the store unchanged.
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
    slots: Vec<NomineeSlot>,
    slot_index: HashMap<NomineeId, usize>,
    snapshot_path: Option<PathBuf>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates an empty store for the given nominees.
    pub fn new(nominees: Vec<Nominee>, settings: ElectionSettings) -> MemoryStore {
        let mut slots: Vec<NomineeSlot> = Vec::new();
        let mut slot_index: HashMap<NomineeId, usize> = HashMap::new();
        for n in nominees {
            if slot_index.contains_key(&n.id) {
                warn!("MemoryStore::new: dropping duplicate nominee {}", n.id);
                continue;
            }
            slot_index.insert(n.id.clone(), slots.len());
            slots.push(NomineeSlot {
                nominee: Nominee { vote_count: 0, ..n },
                count: AtomicU64::new(0),
            });
        }
        MemoryStore {
            ledger: Mutex::new(Ledger {
                settings,
                ..Ledger::default()
            }),
            slots,
            slot_index,
            snapshot_path: None,
            lock_timeout: MemoryStore::DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Opens a store backed by a snapshot file.
    ///
    /// If the file exists, its voter rows and closed flag are loaded. The cap
    /// always comes from `settings`. The counters are recomputed from the
    /// loaded rows; the counts stored in the file are ignored.
    pub fn open(
        path: &Path,
        nominees: Vec<Nominee>,
        settings: ElectionSettings,
    ) -> StoreResult<MemoryStore> {
        let mut store = MemoryStore::new(nominees, settings);
        store.snapshot_path = Some(path.to_path_buf());
        if !path.exists() {
            info!("MemoryStore::open: no snapshot at {:?}, starting empty", path);
            {
                let ledger = store.lock_ledger("open")?;
                store.persist(&ledger)?;
            }
            return Ok(store);
        }

        let contents = fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        {
            let mut ledger = store.lock_ledger("open")?;
            ledger.settings.is_closed = snapshot.settings.is_closed;
            for voter in snapshot.voters {
                if !store.slot_index.contains_key(&voter.nominee_id) {
                    return Err(StoreError::Corrupt(format!(
                        "voter {} references unknown nominee {}",
                        voter.id, voter.nominee_id
                    )));
                }
                if ledger.by_email.contains_key(&voter.email)
                    || ledger.by_origin.contains_key(&voter.origin)
                {
                    return Err(StoreError::Corrupt(format!(
                        "voter {} violates a unique key",
                        voter.id
                    )));
                }
                ledger.push(voter);
            }
            ledger.next_sequence = ledger.next_sequence.max(snapshot.next_sequence);
            // Snapshots are written newest last, the ledger keeps that order.
            for voter in ledger.voters.iter() {
                let idx = store.slot_index[&voter.nominee_id];
                store.slots[idx].count.fetch_add(1, Ordering::SeqCst);
            }
            info!(
                "MemoryStore::open: loaded {} voters from {:?} (closed: {})",
                ledger.voters.len(),
                path,
                ledger.settings.is_closed
            );
        }
        Ok(store)
    }

    pub fn with_lock_timeout(self, lock_timeout: Duration) -> MemoryStore {
        MemoryStore {
            lock_timeout,
            ..self
        }
    }

    fn lock_ledger(&self, operation: &'static str) -> StoreResult<MutexGuard<'_, Ledger>> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match self.ledger.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::Poisoned),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        warn!("MemoryStore: lock timeout during {}", operation);
                        return Err(StoreError::Timeout { operation });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
            }
        }
    }

    fn slot(&self, id: &NomineeId) -> StoreResult<&NomineeSlot> {
        self.slot_index
            .get(id)
            .map(|idx| &self.slots[*idx])
            .ok_or_else(|| StoreError::UnknownNominee(id.clone()))
    }

    fn nominee_view(slot: &NomineeSlot) -> Nominee {
        Nominee {
            vote_count: slot.count.load(Ordering::SeqCst),
            ..slot.nominee.clone()
        }
    }

    // Writes the ledger to the snapshot file, if any. Must be called with the
    // ledger lock held so that snapshots are never interleaved.
    fn persist(&self, ledger: &Ledger) -> StoreResult<()> {
        let path = match &self.snapshot_path {
            Some(p) => p,
            None => return Ok(()),
        };
        let snapshot = Snapshot {
            settings: ledger.settings,
            nominees: self.slots.iter().map(MemoryStore::nominee_view).collect(),
            voters: ledger.voters.clone(),
            next_sequence: ledger.next_sequence,
        };
        let js = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, js).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|e| StoreError::Io(e.to_string()))?;
        debug!(
            "MemoryStore::persist: wrote {} voters to {:?}",
            ledger.voters.len(),
            path
        );
        Ok(())
    }
}

fn voter_id(sequence: u64, email: &str) -> VoterId {
    let digest = sha256::digest(format!("{:016}{}", sequence, email));
    VoterId(digest[..16].to_string())
}

impl ElectionStore for MemoryStore {
    fn settings(&self) -> StoreResult<ElectionSettings> {
        Ok(self.lock_ledger("settings")?.settings)
    }

    fn set_closed(&self, closed: bool) -> StoreResult<bool> {
        let mut ledger = self.lock_ledger("set_closed")?;
        let previous = ledger.settings.is_closed;
        if previous == closed {
            return Ok(previous);
        }
        ledger.settings.is_closed = closed;
        if let Err(e) = self.persist(&ledger) {
            ledger.settings.is_closed = previous;
            return Err(e);
        }
        Ok(previous)
    }

    fn nominees(&self) -> StoreResult<Vec<Nominee>> {
        Ok(self.slots.iter().map(MemoryStore::nominee_view).collect())
    }

    fn nominee(&self, id: &NomineeId) -> StoreResult<Option<Nominee>> {
        Ok(self
            .slot_index
            .get(id)
            .map(|idx| MemoryStore::nominee_view(&self.slots[*idx])))
    }

    fn count_voters(&self) -> StoreResult<u64> {
        Ok(self.lock_ledger("count_voters")?.voters.len() as u64)
    }

    fn count_voters_for(&self, id: &NomineeId) -> StoreResult<u64> {
        let ledger = self.lock_ledger("count_voters_for")?;
        Ok(ledger.voters.iter().filter(|v| v.nominee_id == *id).count() as u64)
    }

    fn voter_by_email(&self, email: &str) -> StoreResult<Option<Voter>> {
        let ledger = self.lock_ledger("voter_by_email")?;
        Ok(ledger.by_email.get(email).map(|idx| ledger.voters[*idx].clone()))
    }

    fn voter_by_origin(&self, origin: &str) -> StoreResult<Option<Voter>> {
        let ledger = self.lock_ledger("voter_by_origin")?;
        Ok(ledger
            .by_origin
            .get(origin)
            .map(|idx| ledger.voters[*idx].clone()))
    }

    fn voters(&self) -> StoreResult<Vec<Voter>> {
        let ledger = self.lock_ledger("voters")?;
        Ok(ledger.voters.iter().rev().cloned().collect())
    }

    fn insert_voter(&self, voter: NewVoter) -> Result<Voter, InsertError> {
        if !self.slot_index.contains_key(&voter.nominee_id) {
            return Err(InsertError::Store(StoreError::UnknownNominee(
                voter.nominee_id,
            )));
        }
        let mut ledger = self.lock_ledger("insert_voter")?;
        if ledger.by_email.contains_key(&voter.email) {
            return Err(InsertError::Conflict(UniqueKey::Email));
        }
        if ledger.by_origin.contains_key(&voter.origin) {
            return Err(InsertError::Conflict(UniqueKey::Origin));
        }
        let row = Voter {
            id: voter_id(ledger.next_sequence, &voter.email),
            name: voter.name,
            email: voter.email,
            phone: voter.phone,
            origin: voter.origin,
            nominee_id: voter.nominee_id,
            created_at: Utc::now(),
        };
        ledger.push(row.clone());
        if let Err(e) = self.persist(&ledger) {
            ledger.pop();
            return Err(InsertError::Store(e));
        }
        Ok(row)
    }

    fn increment_vote_count(&self, id: &NomineeId) -> StoreResult<u64> {
        Ok(self.slot(id)?.count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn set_vote_count(&self, id: &NomineeId, value: u64) -> StoreResult<()> {
        self.slot(id)?.count.store(value, Ordering::SeqCst);
        Ok(())
    }

    fn clear_ledger(&self) -> StoreResult<()> {
        let mut ledger = self.lock_ledger("clear_ledger")?;
        // Sequence numbers keep growing so that voter ids are never reused.
        let fresh = Ledger {
            settings: ledger.settings,
            next_sequence: ledger.next_sequence,
            ..Ledger::default()
        };
        let previous = std::mem::replace(&mut *ledger, fresh);
        if let Err(e) = self.persist(&ledger) {
            *ledger = previous;
            return Err(e);
        }
        for slot in self.slots.iter() {
            slot.count.store(0, Ordering::SeqCst);
        }
        info!("MemoryStore::clear_ledger: removed {} voters", previous.voters.len());
        Ok(())
    }
}
