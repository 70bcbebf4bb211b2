use log::info;

use crate::config::ElectionSettings;
use crate::store::{ElectionStore, StoreResult};

/// Result of a close request.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum CloseOutcome {
    /// This call moved the election from open to closed.
    Closed,
    /// The election was already closed. Nothing changed.
    AlreadyClosed,
}

/// The open/closed latch of the election.
///
/// Settings are read from the store on every call and never cached, so a
/// close performed by any request is seen by the next read of every other.
pub struct ElectionState<'a, S: ElectionStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ElectionStore + ?Sized> ElectionState<'a, S> {
    pub fn new(store: &'a S) -> ElectionState<'a, S> {
        ElectionState { store }
    }

    pub fn settings(&self) -> StoreResult<ElectionSettings> {
        self.store.settings()
    }

    /// Closes the election. Closing a closed election is a no-op.
    pub fn close(&self) -> StoreResult<CloseOutcome> {
        if self.store.set_closed(true)? {
            Ok(CloseOutcome::AlreadyClosed)
        } else {
            info!("ElectionState::close: election is now closed");
            Ok(CloseOutcome::Closed)
        }
    }

    /// Reopens the election.
    ///
    /// Only meaningful as part of an administrative reset, after the ledger
    /// has been cleared.
    pub fn reopen(&self) -> StoreResult<()> {
        if self.store.set_closed(false)? {
            info!("ElectionState::reopen: election is open again");
        }
        Ok(())
    }
}
