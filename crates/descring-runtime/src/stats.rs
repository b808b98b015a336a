//! Per-core counters
//!
//! Counters are relaxed atomics bumped on the hot paths; `snapshot()`
//! copies them into a plain struct for reporting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! core_stats {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// Live counters of one core
        #[derive(Debug, Default)]
        pub struct CoreStats {
            $($(#[$doc])* pub(crate) $name: AtomicU64,)*
        }

        /// Point-in-time copy of `CoreStats`
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $($(#[$doc])* pub $name: u64,)*
        }

        impl CoreStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        impl StatsSnapshot {
            /// Accumulate another core's counters
            pub fn merge(&mut self, other: &StatsSnapshot) {
                $(self.$name += other.$name;)*
            }
        }

        impl fmt::Display for StatsSnapshot {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                $(writeln!(f, "  {:<24}{}", stringify!($name), self.$name)?;)*
                Ok(())
            }
        }
    };
}

core_stats! {
    /// Descriptors handed out by `allocate`
    allocations,
    /// Allocations that parked on a slot
    parks,
    /// Reclamation passes run by the allocating thread itself
    reclaim_waits_inline,
    /// Reclamation passes scheduled on another core's worker and awaited
    reclaim_waits_remote,
    /// Asynchronous worker kicks
    kicks,
    /// Completions appended to this core's lazy list
    lazy_pushes,
    /// Completions pushed onto some core's final list from here
    final_pushes,
    /// Descriptors whose slot was made reusable by reclamation
    reclaimed,
    /// Pages returned to the pool by reclamation
    pages_recycled,
    /// Pages unmapped and freed
    pages_unmapped,
    /// Pages mapped at attach time
    pages_introduced,
    /// Pages the page cache accepted
    cache_inserted,
    /// Pages the page cache already had
    cache_already_present,
    /// Pages the page cache rejected for other reasons
    cache_errors,
    /// Chains released because submission failed
    submit_failures,
}

impl CoreStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n != 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}
