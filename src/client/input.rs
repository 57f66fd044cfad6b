use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use ratatui::backend::Backend;

use super::bus::MessageBus;
use super::display::Display;
use super::terminal::TerminalMode;
use crate::protocol::{FrameKind, Request};

pub const BACKSPACE: u8 = 127;
const CTRL_H: u8 = 8;
const CTRL_C: u8 = 3;
const CTRL_D: u8 = 4;

const EMPTY_MESSAGE: &str = "Message cannot be empty.";
const EMPTY_NAME: &str = "Name cannot be empty.";

enum LineEnd {
    Enter,
    Quit,
}

/// Turns raw keystrokes into frames on the message bus.
///
/// Runs on a plain thread: every read blocks on the terminal, and frames are
/// pushed with the bus's blocking enqueue.
pub struct InputReader<R, M, B: Backend> {
    keys: R,
    mode: M,
    display: Arc<Display<B>>,
    bus: MessageBus,
    connected: Arc<AtomicBool>,
    max_line: usize,
}

impl<R, M, B> InputReader<R, M, B>
where
    R: Read,
    M: TerminalMode,
    B: Backend,
{
    pub fn new(
        keys: R,
        mode: M,
        display: Arc<Display<B>>,
        bus: MessageBus,
        connected: Arc<AtomicBool>,
        max_line: usize,
    ) -> Self {
        Self {
            keys,
            mode,
            display,
            bus,
            connected,
            max_line,
        }
    }

    /// Name entry: drops to line mode, prompts until a non-empty name is
    /// given, queues the `name` frame and goes back to raw mode.
    pub fn set_name(&mut self) -> Result<()> {
        self.mode.leave_raw()?;
        let mut notice = None;
        let name = loop {
            self.display.prompt_name(notice)?;
            let Some(line) = self.read_plain_line()? else {
                bail!("terminal input closed during name entry");
            };
            if line.is_empty() {
                notice = Some(EMPTY_NAME);
                continue;
            }
            break String::from_utf8_lossy(&line).into_owned();
        };

        self.display.set_name(&name);
        self.bus
            .enqueue_blocking(Request::new(FrameKind::Name, name.as_bytes()))?;
        self.mode.enter_raw()?;
        self.display.refresh(false)?;
        Ok(())
    }

    /// Collects lines until the user quits or the connection drops.
    pub fn run(mut self) -> Result<()> {
        while self.connected.load(Ordering::SeqCst) {
            let end = self.collect_line()?;
            let mut line = self.display.take_input();
            if let LineEnd::Quit = end {
                line = b"quit".to_vec();
            }

            if line.is_empty() {
                self.display.notify(EMPTY_MESSAGE)?;
                continue;
            }
            if line == b"name" {
                self.set_name()?;
                continue;
            }

            let kind = if line == b"quit" {
                FrameKind::Quit
            } else {
                FrameKind::Text
            };
            self.bus.enqueue_blocking(Request::new(kind, &line))?;
            self.display.refresh(false)?;
            if kind == FrameKind::Quit {
                break;
            }
        }
        Ok(())
    }

    fn collect_line(&mut self) -> Result<LineEnd> {
        // set while the tail of a character that did not fit is being skipped
        let mut skipping = false;
        loop {
            let Some(byte) = self.read_byte()? else {
                return Ok(LineEnd::Quit);
            };
            match byte {
                b'\n' | b'\r' => return Ok(LineEnd::Enter),
                BACKSPACE | CTRL_H => {
                    self.display.pop_input()?;
                }
                CTRL_C | CTRL_D => return Ok(LineEnd::Quit),
                _ if skipping && is_continuation(byte) => {}
                _ => {
                    skipping = self.display.input_len() + char_width(byte) > self.max_line;
                    if !skipping {
                        self.display.push_input(byte)?;
                    }
                }
            }
        }
    }

    /// Reads one line with the terminal echoing for us. `None` at end of input.
    fn read_plain_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                None if line.is_empty() => return Ok(None),
                None | Some(b'\n') => return Ok(Some(line)),
                Some(b'\r') => {}
                Some(b) => line.push(b),
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.keys.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Bytes in the UTF-8 character that starts with `lead`.
fn char_width(lead: u8) -> usize {
    match lead {
        0xF0..=0xF7 => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}
