//! Linux futex-based parking
//!
//! Futex word semantics: a wake sequence number.
//!
//! When a thread parks:
//! 1. Increment parked count
//! 2. FUTEX_WAIT on the word (blocks only while word == token)
//! 3. Decrement parked count on return
//!
//! When waking:
//! 1. Advance the word
//! 2. FUTEX_WAKE if anyone is parked

use super::{ParkToken, Parking};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    /// Wake sequence
    futex: AtomicU32,

    /// Count of parked threads
    parked: AtomicUsize,
}

impl FutexParking {
    pub const fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        // Advance first; a thread between prepare and FUTEX_WAIT sees EAGAIN
        self.futex.fetch_add(1, Ordering::SeqCst);

        if self.parked.load(Ordering::SeqCst) == 0 {
            return;
        }

        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for FutexParking {
    #[inline]
    fn prepare(&self) -> ParkToken {
        ParkToken(self.futex.load(Ordering::SeqCst))
    }

    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);

        if self.futex.load(Ordering::SeqCst) != token.0 {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // FUTEX_WAIT: sleep while futex == token
        // ETIMEDOUT, EAGAIN and EINTR all fall through to the sequence check
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                token.0,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }

        self.parked.fetch_sub(1, Ordering::SeqCst);

        self.futex.load(Ordering::SeqCst) != token.0
    }

    fn wake_one(&self) {
        self.futex_wake(1);
    }

    fn wake_all(&self) {
        self.futex_wake(i32::MAX);
    }

    #[inline]
    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }
}
