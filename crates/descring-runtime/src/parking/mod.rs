//! Parking for descriptor waiters and reclamation workers
//!
//! Every wait in the allocator follows the same protocol:
//!
//! 1. `prepare()` takes a token *before* the condition is checked
//! 2. the condition is checked (ring probe, job flag, queue)
//! 3. `park(token, ..)` sleeps only if no wake has happened since step 1
//!
//! Wakers change state first and then call `wake_one()`/`wake_all()`,
//! which always advances the sequence. A wake that lands between the
//! check and the park is therefore never lost.

use std::time::Duration;

/// Snapshot of a parking sequence, taken before checking the wait condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkToken(pub(crate) u32);

/// Platform-specific parking mechanism
pub trait Parking: Send + Sync {
    /// Take a token for a subsequent `park`
    fn prepare(&self) -> ParkToken;

    /// Sleep until a wake newer than `token`, or until timeout
    ///
    /// Returns `true` if a wake happened since `token` was taken.
    /// Callers re-check their condition regardless of the result.
    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool;

    /// Wake one parked thread
    fn wake_one(&self);

    /// Wake every parked thread
    fn wake_all(&self);

    /// Number of currently parked threads (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = PlatformParking::new();
        let token = parking.prepare();
        let start = Instant::now();
        let woken = parking.park(token, Some(Duration::from_millis(50)));

        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(parking.parked_count(), 0);
    }

    #[test]
    fn test_wake_before_park_not_lost() {
        let parking = PlatformParking::new();
        let token = parking.prepare();
        parking.wake_one();

        let start = Instant::now();
        assert!(parking.park(token, Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_one() {
        let parking = Arc::new(PlatformParking::new());
        let ready = Arc::new(AtomicBool::new(false));

        let handle = {
            let parking = Arc::clone(&parking);
            let ready = Arc::clone(&ready);
            thread::spawn(move || loop {
                let token = parking.prepare();
                if ready.load(Ordering::Acquire) {
                    return true;
                }
                parking.park(token, Some(Duration::from_secs(10)));
            })
        };

        thread::sleep(Duration::from_millis(50));
        ready.store(true, Ordering::Release);
        parking.wake_one();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wake_all() {
        let parking = Arc::new(PlatformParking::new());
        let token = parking.prepare();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let parking = Arc::clone(&parking);
                thread::spawn(move || parking.park(token, Some(Duration::from_secs(10))))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        parking.wake_all();

        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(parking.parked_count(), 0);
    }
}
