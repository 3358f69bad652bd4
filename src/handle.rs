//! Explicit, single-initialization access to a [`Searcher`].

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{error, info};

use crate::{
    error::{Error, Result},
    search::{Recommendation, Searcher},
};

/// Observable lifecycle of a [`SearchHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleState::Uninitialized => f.write_str("uninitialized"),
            HandleState::Loading => f.write_str("loading"),
            HandleState::Ready => f.write_str("ready"),
            HandleState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

enum Slot {
    Uninitialized,
    Loading,
    Ready(Arc<Searcher>),
    Failed(String),
}

impl Slot {
    fn state(&self) -> HandleState {
        match self {
            Slot::Uninitialized => HandleState::Uninitialized,
            Slot::Loading => HandleState::Loading,
            Slot::Ready(_) => HandleState::Ready,
            Slot::Failed(reason) => HandleState::Failed(reason.clone()),
        }
    }
}

/// Owns the searcher for a serving process.
///
/// Only the first [`initialize`](Self::initialize) call runs its loader;
/// the loader runs outside the lock. Once ready, queries clone an `Arc`
/// and never hold the lock while searching. A failed load is final: the
/// handle reports itself unavailable instead of serving from a suspect
/// index.
pub struct SearchHandle {
    slot: RwLock<Slot>,
}

impl Default for SearchHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchHandle {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Uninitialized),
        }
    }

    pub fn state(&self) -> HandleState {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn initialize<F>(&self, loader: F) -> Result<Arc<Searcher>>
    where
        F: FnOnce() -> Result<Searcher>,
    {
        {
            let mut slot =
                self.slot.write().unwrap_or_else(PoisonError::into_inner);
            match &*slot {
                Slot::Uninitialized => *slot = Slot::Loading,
                Slot::Ready(searcher) => return Ok(Arc::clone(searcher)),
                other => {
                    return Err(Error::Unavailable {
                        state: other.state().to_string(),
                    });
                }
            }
        }

        let outcome = loader();

        let mut slot =
            self.slot.write().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(searcher) => {
                let searcher = Arc::new(searcher);
                info!(records = searcher.len(), "search handle ready");
                *slot = Slot::Ready(Arc::clone(&searcher));
                Ok(searcher)
            }
            Err(e) => {
                error!(error = %e, "search handle failed to load");
                *slot = Slot::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// The ready searcher, or [`Error::Unavailable`] in any other state.
    pub fn searcher(&self) -> Result<Arc<Searcher>> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Ready(searcher) => Ok(Arc::clone(searcher)),
            other => Err(Error::Unavailable {
                state: other.state().to_string(),
            }),
        }
    }

    pub fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Recommendation>> {
        self.searcher()?.search(query, top_k)
    }
}
