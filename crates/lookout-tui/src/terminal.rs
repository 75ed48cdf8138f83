//! Terminal lifecycle.
//!
//! Raw mode and the alternate screen are scoped: they are released on
//! normal exit, on panic (via the hook installed here), and on a forced
//! signal exit (via the interrupt restore hook). No exit path leaves the
//! terminal broken.

use std::io::{self, Stdout};
use std::panic;

use anyhow::{Context, Result};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

/// Enables raw mode, enters the alternate screen, and turns on mouse
/// capture. Call `install_panic_hook()` first.
pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("create terminal")?;
    Ok(terminal)
}

/// Restores the terminal. Idempotent and safe to call from any exit
/// path, including inside a panic hook.
pub fn restore_terminal() -> Result<()> {
    let _ = execute!(io::stdout(), DisableMouseCapture);
    execute!(io::stdout(), LeaveAlternateScreen).context("leave alternate screen")?;
    disable_raw_mode().context("disable raw mode")?;
    Ok(())
}

/// Installs a panic hook that restores the terminal before the panic
/// message prints, so the message is actually readable.
pub fn install_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));
}
