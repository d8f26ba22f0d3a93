//! Process-wide seconds counter for TTL bookkeeping.
//!
//! Expiration deadlines are whole seconds since this clock started, stored
//! as `u32`.  One ticker thread refreshes the counter about once a second;
//! the read side is a single relaxed atomic load, so the get path never
//! touches a real clock syscall.
//!
//! The ticker is reference-counted: the first cache built with expiration
//! enabled starts it, the last one to close stops and joins it.  Caches
//! without TTL never start the clock and always read `0`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

static NOW: AtomicU32 = AtomicU32::new(0);
static TICKER: Mutex<Option<Ticker>> = Mutex::new(None);

struct Ticker {
    refs: usize,
    /// Dropping this wakes and terminates the ticker thread.
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Seconds elapsed since the ticker started, at ~1 s granularity.
#[inline]
pub(crate) fn now() -> u32 {
    NOW.load(Ordering::Relaxed)
}

/// Takes one reference on the process clock, starting the ticker thread if
/// this is the first.
pub(crate) fn start() {
    let mut ticker = TICKER.lock();
    match ticker.as_mut() {
        Some(t) => t.refs += 1,
        None => {
            NOW.store(0, Ordering::Relaxed);
            let (shutdown, wakeups) = bounded::<()>(1);
            let origin = Instant::now();
            let handle = std::thread::spawn(move || loop {
                match wakeups.recv_timeout(Duration::from_secs(1)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {
                        NOW.store(origin.elapsed().as_secs() as u32, Ordering::Relaxed);
                    }
                }
            });
            *ticker = Some(Ticker {
                refs: 1,
                shutdown,
                handle,
            });
        }
    }
}

/// Releases one reference; the last release stops and joins the ticker.
pub(crate) fn stop() {
    let mut ticker = TICKER.lock();
    let last = match ticker.as_mut() {
        Some(t) => {
            t.refs -= 1;
            t.refs == 0
        }
        None => false,
    };
    if last {
        if let Some(t) = ticker.take() {
            drop(t.shutdown);
            let _ = t.handle.join();
        }
    }
}
