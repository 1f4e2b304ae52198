//! Side blocking.
//!
//! - `side`: pure classification of a ball position into LEFT/CENTER/RIGHT.
//! - `blocker`: the coordinator that turns a side classification into one
//!   hardware-confirmed blocking session at a time.
//! - `stats`: monotone counters exposed through `BallBlocker::get_statistics`.

pub mod blocker;
pub mod side;
pub mod stats;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::serial::SerialLink;

pub use blocker::{BallBlocker, BlockerConfig};
pub use side::{determine_side, BlockSide, SideThresholds};
pub use stats::{BlockCounters, BlockerStatistics};

/// Serial link shared between pan output and blocking sessions.
pub type SharedLink = Arc<Mutex<SerialLink>>;

pub fn shared_link(link: SerialLink) -> SharedLink {
    Arc::new(Mutex::new(link))
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{} lock poisoned; recovering", what);
            poisoned.into_inner()
        }
    }
}
