use bale_store::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_TOKEN: OnceLock<CancelToken> = OnceLock::new();

/// Install a Ctrl-C handler that cancels `token`.
///
/// The first signal asks running operations to stop at their next
/// cancellation point; a second one exits immediately. Only the first call
/// installs a handler; later calls return the token registered then.
pub fn install_signal_handler(token: &CancelToken) -> CancelToken {
    let registered = SHUTDOWN_TOKEN.get_or_init(|| token.clone()).clone();
    let handler_token = registered.clone();
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        handler_token.cancel();
        eprintln!("\nshutdown requested, finishing current operation...");
    });
    registered
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
