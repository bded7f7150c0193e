//! Deterministic in-memory implementations of the `session_backend` contract.
//!
//! Intended for local development and integration tests of the sync core. No
//! network or protocol logic lives here.

use std::sync::{Mutex, MutexGuard};

mod backend;
mod connector;

pub use backend::{MockBackend, MockCall};
pub use connector::{ConnectScript, MockConnector, MockPeer};

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
