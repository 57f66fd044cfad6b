use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Text},
    widgets::Paragraph,
    Frame, Terminal,
};

const BANNER: &str = "Welcome to TCP-Chat!";
const NAME_PROMPT: &str = "[ENTER YOUR NAME]: ";
const HELP: [&str; 2] = [
    "Enter 'name' to change your name",
    "Enter 'quit' to disconnect",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    NameEntry,
}

/// What the renderer knows about the session.
#[derive(Default)]
struct View {
    screen: Screen,
    history: Vec<u8>,
    input: Vec<u8>,
    name: String,
    notice: Option<String>,
}

struct Inner<B: Backend> {
    terminal: Terminal<B>,
    view: View,
}

/// The screen plus the client state drawn on it, behind one lock so that
/// redraws from the network driver and the keyboard thread never interleave.
pub struct Display<B: Backend> {
    inner: Mutex<Inner<B>>,
}

impl<B: Backend> Display<B> {
    pub fn new(terminal: Terminal<B>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                terminal,
                view: View::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Redraws the chat screen, optionally with the line being typed.
    pub fn refresh(&self, with_input: bool) -> io::Result<()> {
        self.lock().draw_chat(with_input)
    }

    /// Stores `blob` as the new history snapshot if its length differs from
    /// the current one, and redraws. Returns whether it was taken.
    pub fn update_history(&self, blob: Vec<u8>) -> io::Result<bool> {
        let mut inner = self.lock();
        if blob.len() == inner.view.history.len() {
            return Ok(false);
        }
        inner.view.history = blob;
        inner.draw_chat(true)?;
        Ok(true)
    }

    pub fn history_snapshot(&self) -> Vec<u8> {
        self.lock().view.history.clone()
    }

    pub fn input_len(&self) -> usize {
        self.lock().view.input.len()
    }

    #[cfg(test)]
    pub(crate) fn input(&self) -> Vec<u8> {
        self.lock().view.input.clone()
    }

    pub fn push_input(&self, byte: u8) -> io::Result<()> {
        let mut inner = self.lock();
        inner.view.notice = None;
        inner.view.input.push(byte);
        inner.draw_chat(true)
    }

    /// Erases the last character typed. Returns false on an empty line.
    pub fn pop_input(&self) -> io::Result<bool> {
        let mut inner = self.lock();
        let input = &mut inner.view.input;
        if input.is_empty() {
            return Ok(false);
        }
        // drop continuation bytes, then the lead byte
        while matches!(input.last(), Some(b) if b & 0xC0 == 0x80) {
            input.pop();
        }
        input.pop();
        inner.draw_chat(true)?;
        Ok(true)
    }

    /// Hands over the completed line and starts a fresh one.
    pub fn take_input(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().view.input)
    }

    pub fn set_name(&self, name: &str) {
        self.lock().view.name = name.to_string();
    }

    #[cfg(test)]
    pub(crate) fn name(&self) -> String {
        self.lock().view.name.clone()
    }

    /// Shows a one-line notice above the prompt until the next keystroke.
    pub fn notify(&self, notice: &str) -> io::Result<()> {
        let mut inner = self.lock();
        inner.view.notice = Some(notice.to_string());
        inner.draw_chat(true)
    }

    /// Draws the name-entry screen and leaves the cursor after the prompt.
    pub fn prompt_name(&self, notice: Option<&str>) -> io::Result<()> {
        let mut inner = self.lock();
        inner.view.notice = notice.map(str::to_string);
        inner.enter(Screen::NameEntry)?;
        let Inner { terminal, view } = &mut *inner;
        terminal.draw(|f| draw_name_entry(f, view))?;
        Ok(())
    }

    /// Leaves the screen usable for plain output after the session ends.
    pub fn restore(&self) -> io::Result<()> {
        let mut inner = self.lock();
        inner.terminal.clear()?;
        inner.terminal.show_cursor()
    }

    #[cfg(test)]
    pub(crate) fn with_backend<T>(&self, f: impl FnOnce(&B) -> T) -> T {
        f(self.lock().terminal.backend())
    }
}

impl<B: Backend> Inner<B> {
    fn enter(&mut self, screen: Screen) -> io::Result<()> {
        if self.view.screen != screen {
            self.view.screen = screen;
            self.terminal.clear()?;
        }
        Ok(())
    }

    fn draw_chat(&mut self, with_input: bool) -> io::Result<()> {
        self.enter(Screen::Chat)?;
        let Inner { terminal, view } = self;
        terminal.draw(|f| draw_chat(f, view, with_input))?;
        Ok(())
    }
}

// ─── Drawing ─────────────────────────────────────────────────────────────────

fn draw_chat(f: &mut Frame, view: &View, with_input: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // history
            Constraint::Length(1), // notice
            Constraint::Length(2), // help
            Constraint::Length(1), // prompt
        ])
        .split(f.area());

    let history = String::from_utf8_lossy(&view.history);
    f.render_widget(Paragraph::new(tail(&history, chunks[0])), chunks[0]);

    if let Some(notice) = &view.notice {
        let widget = Paragraph::new(notice.as_str()).style(Style::default().fg(Color::Red));
        f.render_widget(widget, chunks[1]);
    }

    let help: Vec<Line> = HELP.iter().map(|l| Line::from(*l)).collect();
    f.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        chunks[2],
    );

    let mut prompt = format!("{}: ", view.name);
    if with_input {
        prompt.push_str(&String::from_utf8_lossy(&view.input));
    }
    let prompt = Line::from(prompt);
    let width = prompt.width() as u16;
    f.render_widget(
        Paragraph::new(prompt).style(Style::default().add_modifier(Modifier::BOLD)),
        chunks[3],
    );
    f.set_cursor_position(cursor_at(chunks[3], width));
}

fn draw_name_entry(f: &mut Frame, view: &View) {
    let area = f.area();
    let mut lines = vec![
        Line::styled(BANNER, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Line::from(""),
    ];
    if let Some(notice) = &view.notice {
        lines.push(Line::styled(notice.clone(), Style::default().fg(Color::Red)));
    }
    let prompt_row = lines.len() as u16;
    lines.push(Line::from(NAME_PROMPT));
    f.render_widget(Paragraph::new(lines), area);

    let row = Rect {
        y: area.y + prompt_row.min(area.height.saturating_sub(1)),
        height: 1,
        ..area
    };
    f.set_cursor_position(cursor_at(row, NAME_PROMPT.len() as u16));
}

/// The last lines of `history` that fit in `area`.
fn tail(history: &str, area: Rect) -> Text<'_> {
    let lines: Vec<&str> = history.lines().collect();
    let start = lines.len().saturating_sub(area.height as usize);
    Text::from(lines[start..].iter().map(|l| Line::from(*l)).collect::<Vec<_>>())
}

fn cursor_at(row: Rect, width: u16) -> (u16, u16) {
    (row.x + width.min(row.width.saturating_sub(1)), row.y)
}
