use std::io;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

/// Switches the controlling terminal between raw (no echo, unbuffered) and
/// normal line mode.
pub trait TerminalMode: Send {
    fn enter_raw(&self) -> io::Result<()>;
    fn leave_raw(&self) -> io::Result<()>;
}

pub struct Crossterm;

impl TerminalMode for Crossterm {
    fn enter_raw(&self) -> io::Result<()> {
        enable_raw_mode()
    }

    fn leave_raw(&self) -> io::Result<()> {
        disable_raw_mode()
    }
}
