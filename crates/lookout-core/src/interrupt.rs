//! Process interrupt flags.
//!
//! Ctrl+C, SIGTERM, and SIGHUP all set a quit flag that the event loop
//! polls each tick. The handlers do nothing else; a second Ctrl+C
//! force-exits after running the registered terminal-restore hook so the
//! terminal is never left raw.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static QUIT: AtomicBool = AtomicBool::new(false);
static RESTORE_HOOK: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// Installs the signal handlers. Call once, before entering the
/// alternate screen.
pub fn init() {
    ctrlc::set_handler(|| {
        if QUIT.swap(true, Ordering::SeqCst) {
            // Second interrupt: restore the terminal and bail out.
            if let Some(hook) = RESTORE_HOOK.get() {
                hook();
            }
            std::process::exit(130);
        }
    })
    .expect("install Ctrl+C handler");

    #[cfg(unix)]
    {
        use signal_hook::consts::signal::{SIGHUP, SIGTERM};

        // SAFETY: the closures only store to an AtomicBool, which is
        // async-signal-safe.
        unsafe {
            signal_hook::low_level::register(SIGTERM, || {
                QUIT.store(true, Ordering::SeqCst);
            })
            .expect("register SIGTERM handler");
            signal_hook::low_level::register(SIGHUP, || {
                QUIT.store(true, Ordering::SeqCst);
            })
            .expect("register SIGHUP handler");
        }
    }
}

/// Whether a quit was requested by signal.
pub fn should_quit() -> bool {
    QUIT.load(Ordering::SeqCst)
}

/// Registers the hook run before a forced exit. The TUI uses this to
/// leave the alternate screen and re-enable the cursor.
pub fn set_restore_hook<F>(hook: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let _ = RESTORE_HOOK.set(Box::new(hook));
}
