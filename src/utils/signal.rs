//! Deferred SIGINT/SIGTERM handling.
//!
//! A boot loader tool must never be killed half-way through writing a boot
//! sector, so the first termination signal only records itself: the running
//! operation finishes (including its mount cleanup), no new operation is
//! started, and the signal is re-raised on the way out. A second signal
//! falls through to the default disposition.

use crate::utils::error::Result;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};

/// Number of the first signal received, 0 while none arrived.
static PENDING: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(sig: libc::c_int) {
    if PENDING
        .compare_exchange(0, sig, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let msg = b"\nInterrupt received, finishing the current step...\n";
        unsafe {
            libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        }
    } else {
        let msg = b"\nForced exit, mounts may be left behind. Run: bootsetup --cleanup\n";
        unsafe {
            libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
            libc::signal(sig, libc::SIG_DFL);
            libc::raise(sig);
        }
    }
}

/// Install the deferring handler for SIGINT and SIGTERM.
pub fn defer_termination_signals() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::sigaction(sig, &action) }?;
    }
    Ok(())
}

/// The signal received so far, if any.
pub fn pending_signal() -> Option<Signal> {
    match PENDING.load(Ordering::SeqCst) {
        0 => None,
        n => Signal::try_from(n).ok(),
    }
}

pub fn is_interrupted() -> bool {
    pending_signal().is_some()
}

/// Restore the default disposition and re-raise the pending signal so the
/// parent shell sees the right exit status. No-op without a pending signal.
pub fn reraise_pending() -> Result<()> {
    if let Some(sig) = pending_signal() {
        unsafe { signal::signal(sig, SigHandler::SigDfl) }?;
        signal::raise(sig)?;
    }
    Ok(())
}
