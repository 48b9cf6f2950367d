use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction,
};
use std::sync::atomic::{AtomicU64, Ordering};

// The handler runs preemptively relative to the event loop, so the only
// thing it does is flip a bit; the loop performs the actual forwarding
// after the next poll() wakeup. This is the one piece of process-global
// state in the proxy.
static PENDING_SIGNALS: AtomicU64 = AtomicU64::new(0);

extern "C" fn record_signal(signo: libc::c_int) {
    if (0..64).contains(&signo) {
        PENDING_SIGNALS.fetch_or(1 << signo, Ordering::SeqCst);
    }
}

/**
 * Route every catchable signal through the recording handler. Handlers are
 * installed without SA_RESTART so a signal interrupts poll() and gets
 * forwarded promptly. SIGKILL and SIGSTOP refuse a handler; that failure
 * is expected and ignored.
 */
pub fn install_forwarding_handlers() {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::empty(),
        SigSet::all(),
    );

    for signo in 1..32 {
        if let Ok(signal) = Signal::try_from(signo) {
            let _ = unsafe { sigaction(signal, &action) };
        }
    }
}

/// Take and clear the pending set, returning the raw signal numbers.
pub fn take_pending_signals() -> Vec<i32> {
    let mask = PENDING_SIGNALS.swap(0, Ordering::SeqCst);
    (1..32).filter(|signo| mask & (1 << signo) != 0).collect()
}
