use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route SIGINT/SIGTERM to the shutdown flag. A second signal exits at once.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        info!("shutdown requested, draining in-flight requests");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
