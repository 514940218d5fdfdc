//! # Connectivity signal
//!
//! Gate holding the pipeline threads back until the network is up. A network manager calls
//! [`ConnectivitySignal::set_established`] once the link is usable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::shutdown::ShutdownToken;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How often a waiting thread rechecks the shutdown token.
const WAIT_POLL: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ConnectivitySignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ConnectivitySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the connection as established and wake all waiters.
    pub fn set_established(&self) {
        let (lock, cvar) = &*self.inner;
        match lock.lock() {
            Ok(mut e) => *e = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        cvar.notify_all();
    }

    pub fn is_established(&self) -> bool {
        let (lock, _) = &*self.inner;
        match lock.lock() {
            Ok(e) => *e,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until the connection is established, returning false if shutdown was requested
    /// first.
    pub fn wait_established(&self, shutdown: &ShutdownToken) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut established = match lock.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };

        while !*established {
            if shutdown.is_triggered() {
                return false;
            }

            established = match cvar.wait_timeout(established, WAIT_POLL) {
                Ok((e, _)) => e,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        true
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
