//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.

use super::{ParkToken, Parking};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Condvar-based parking (fallback)
pub struct FallbackParking {
    /// Wake sequence
    seq: Mutex<u32>,

    condvar: Condvar,

    /// Count of parked threads
    parked: AtomicUsize,
}

impl FallbackParking {
    pub const fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    // A panicking waker cannot leave the sequence inconsistent
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self) {
        let mut guard = self.lock();
        *guard = guard.wrapping_add(1);
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FallbackParking {
    fn prepare(&self) -> ParkToken {
        ParkToken(*self.lock())
    }

    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        let mut guard = self.lock();
        if *guard == token.0 {
            guard = match timeout {
                Some(t) => {
                    self.condvar
                        .wait_timeout(guard, t)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner()),
            };
        }
        let woken = *guard != token.0;
        drop(guard);

        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.advance();
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.condvar.notify_one();
        }
    }

    fn wake_all(&self) {
        self.advance();
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.condvar.notify_all();
        }
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }
}
