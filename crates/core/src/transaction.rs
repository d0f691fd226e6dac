//! Reentrant, all-or-nothing transaction scopes.
//!
//! Nested `begin` calls on the same thread only increase a depth counter; the
//! outermost `commit`/`rollback` is the one that takes effect. An inner rollback
//! marks the whole scope rollback-only, so the outer commit discards everything
//! and reports [`ArchiveError::TransactionFailure`].
//!
//! [`TxCell`] is the in-memory building block used by the stores: one thread owns
//! the open transaction and works on a private copy of the tables, other writers
//! wait for it to finish, and readers outside the transaction see committed state.

use std::sync::{Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use crate::error::{ArchiveError, ArchiveResult};

/// A store that can group several writes into one atomic unit.
pub trait Transactional {
    fn begin(&self) -> ArchiveResult<()>;
    fn commit(&self) -> ArchiveResult<()>;
    fn rollback(&self) -> ArchiveResult<()>;
}

impl<T: Transactional + ?Sized> Transactional for std::sync::Arc<T> {
    fn begin(&self) -> ArchiveResult<()> {
        (**self).begin()
    }

    fn commit(&self) -> ArchiveResult<()> {
        (**self).commit()
    }

    fn rollback(&self) -> ArchiveResult<()> {
        (**self).rollback()
    }
}

/// Run `work` inside a transaction on `target`.
///
/// Commits when `work` succeeds, rolls back and returns the original error when it fails.
pub fn transaction<S, R, F>(target: &S, work: F) -> ArchiveResult<R>
where
    S: Transactional + ?Sized,
    F: FnOnce() -> ArchiveResult<R>,
{
    target.begin()?;
    match work() {
        Ok(value) => {
            target.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = target.rollback() {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            tracing::debug!(error = %err, "transaction rolled back");
            Err(err)
        }
    }
}

fn poisoned<E>(_: E) -> ArchiveError {
    ArchiveError::transaction("lock poisoned")
}

#[derive(Debug)]
struct TxState<T> {
    owner: Option<ThreadId>,
    depth: usize,
    working: Option<T>,
    rollback_only: bool,
}

/// Copy-on-begin transactional cell.
#[derive(Debug)]
pub struct TxCell<T> {
    committed: RwLock<T>,
    state: Mutex<TxState<T>>,
    released: Condvar,
}

impl<T: Clone> TxCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            committed: RwLock::new(value),
            state: Mutex::new(TxState {
                owner: None,
                depth: 0,
                working: None,
                rollback_only: false,
            }),
            released: Condvar::new(),
        }
    }

    fn lock_state(&self) -> ArchiveResult<MutexGuard<'_, TxState<T>>> {
        self.state.lock().map_err(poisoned)
    }

    fn owned_state(&self) -> ArchiveResult<MutexGuard<'_, TxState<T>>> {
        let state = self.lock_state()?;
        if state.owner != Some(thread::current().id()) || state.depth == 0 {
            return Err(ArchiveError::transaction("no active transaction on this thread"));
        }
        Ok(state)
    }

    /// Current nesting depth for the calling thread (0 when it owns no transaction).
    pub fn depth(&self) -> ArchiveResult<usize> {
        let state = self.lock_state()?;
        if state.owner == Some(thread::current().id()) {
            Ok(state.depth)
        } else {
            Ok(0)
        }
    }

    /// Read the tables as seen by the calling thread.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> ArchiveResult<R> {
        let state = self.lock_state()?;
        if state.owner == Some(thread::current().id()) {
            if let Some(working) = state.working.as_ref() {
                return Ok(f(working));
            }
        }
        drop(state);

        let committed = self.committed.read().map_err(poisoned)?;
        Ok(f(&committed))
    }

    /// Apply a mutation. Outside a transaction the write commits on its own.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> ArchiveResult<R>) -> ArchiveResult<R> {
        self.begin()?;
        let result = {
            let mut state = self.lock_state()?;
            match state.working.as_mut() {
                Some(working) => f(working),
                None => Err(ArchiveError::transaction("transaction has no working set")),
            }
        };

        match result {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback()?;
                Err(err)
            }
        }
    }
}

impl<T: Clone> Transactional for TxCell<T> {
    fn begin(&self) -> ArchiveResult<()> {
        let me = thread::current().id();
        let mut state = self.lock_state()?;
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(());
                }
                Some(_) => {
                    state = self.released.wait(state).map_err(poisoned)?;
                }
                None => {
                    let snapshot = self.committed.read().map_err(poisoned)?.clone();
                    state.owner = Some(me);
                    state.depth = 1;
                    state.working = Some(snapshot);
                    state.rollback_only = false;
                    return Ok(());
                }
            }
        }
    }

    fn commit(&self) -> ArchiveResult<()> {
        let mut state = self.owned_state()?;
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }

        let working = state.working.take();
        let doomed = state.rollback_only;
        state.owner = None;
        state.rollback_only = false;

        let result = match (doomed, working) {
            (true, _) => Err(ArchiveError::transaction(
                "an inner scope rolled back; nothing was committed",
            )),
            (false, Some(working)) => match self.committed.write() {
                Ok(mut committed) => {
                    *committed = working;
                    Ok(())
                }
                Err(e) => Err(poisoned(e)),
            },
            (false, None) => Ok(()),
        };

        drop(state);
        self.released.notify_all();
        result
    }

    fn rollback(&self) -> ArchiveResult<()> {
        let mut state = self.owned_state()?;
        state.depth -= 1;
        if state.depth > 0 {
            state.rollback_only = true;
            return Ok(());
        }

        state.working = None;
        state.owner = None;
        state.rollback_only = false;
        drop(state);
        self.released.notify_all();
        Ok(())
    }
}
