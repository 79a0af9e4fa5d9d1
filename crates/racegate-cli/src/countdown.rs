//! In-place terminal countdown.

use racegate_core::{format_countdown, CountdownObserver};
use std::io::Write;
use std::sync::Mutex;

/// Redraws one stderr line per tick; the line is closed when the gate opens.
pub struct TerminalCountdown<W: Write + Send> {
    out: Mutex<W>,
}

impl TerminalCountdown<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> TerminalCountdown<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            // Terminal output is best effort.
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> CountdownObserver for TerminalCountdown<W> {
    fn on_tick(&self, label: &str, remaining_secs: u64) {
        self.write(&format!(
            "\r{label:>8} in {}  ",
            format_countdown(remaining_secs)
        ));
    }

    fn on_reached(&self, label: &str) {
        self.write(&format!("\r{label:>8} reached        \n"));
    }
}
