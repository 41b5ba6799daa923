//! VT100 terminal emulation for agent PTY output.
//!
//! [`Vt100Engine`] wraps an `alacritty_terminal` [`Term`] and keeps what the
//! hub needs on top of it: a bounded scrollback of [`StyledLine`]s, the
//! window title, and OSC 9 / OSC 777 notifications.
//!
//! # Architecture
//!
//! ```text
//! Vt100Engine
//!  ├── term: Term<EngineListener>        (grid, cursor, modes)
//!  ├── processor: ansi::Processor        (feeds bytes into term)
//!  ├── tap: SequenceTap                  (second tokenizer for OSC 9/777, ED 3)
//!  └── scrollback: RingBuffer<StyledLine>
//! ```
//!
//! Lines that leave the top of the primary screen land in the grid's
//! history. After every `process()` and `resize()` they are copied out,
//! oldest first, into the ring buffer and the grid history is cleared, so
//! the ring is the only scrollback store.
//!
//! # Thread Safety
//!
//! The engine itself is not synchronized. [`PtySession`](crate::agent::PtySession)
//! wraps it in an `RwLock`: the reader thread takes the write lock for one
//! `process()` call at a time, display consumers take read locks.

// Rust guideline compliant 2026-02

pub mod cell;
pub mod render;

pub use cell::{Cell, CellAttrs, Color, StyledLine};

use std::sync::{Arc, Mutex};
use std::time::Instant;

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::Line;
use alacritty_terminal::term::{Config, Term, TermMode};
use alacritty_terminal::vte::ansi::Processor;
use alacritty_terminal::vte::{self, Params, Perform};

use crate::agent::notification::{parse_osc_notification, AgentNotification};
use crate::ring_buffer::RingBuffer;

/// Default scrollback capacity in lines.
pub const DEFAULT_SCROLLBACK_LINES: usize = 10_000;

/// Screen dimensions handed to `Term::new` and `Term::resize`.
#[derive(Clone, Copy, Debug)]
struct TermSize {
    rows: usize,
    cols: usize,
}

impl TermSize {
    fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows: usize::from(rows.max(1)),
            cols: usize::from(cols.max(1)),
        }
    }
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.rows
    }

    fn screen_lines(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

/// Receives title changes from the terminal.
///
/// Other events (bells, PTY write-backs, clipboard) are dropped.
#[derive(Clone, Default)]
struct EngineListener {
    title: Arc<Mutex<Option<String>>>,
}

impl EventListener for EngineListener {
    fn send_event(&self, event: Event) {
        match event {
            Event::Title(title) => {
                *self.title.lock().expect("title lock poisoned") = Some(title);
            }
            Event::ResetTitle => {
                *self.title.lock().expect("title lock poisoned") = None;
            }
            _ => {}
        }
    }
}

/// Watches the raw stream for sequences `Term` has no hook for.
///
/// `Term` ignores OSC 9 and OSC 777, and clears only its own history on
/// `CSI 3 J`. A separate tokenizer sees the same bytes so both still reach
/// the engine, including sequences split across reads.
struct SequenceTap {
    parser: vte::Parser,
    seen: TapEvents,
}

#[derive(Default)]
struct TapEvents {
    notifications: Vec<AgentNotification>,
    erase_saved_lines: bool,
}

impl SequenceTap {
    fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            seen: TapEvents::default(),
        }
    }

    fn advance(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.seen, bytes);
    }
}

impl Perform for TapEvents {
    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if let Some(notification) = parse_osc_notification(params) {
            self.notifications.push(notification);
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        if action == 'J' && intermediates.is_empty() && params.iter().next() == Some(&[3][..]) {
            self.erase_saved_lines = true;
        }
    }
}

/// Stateful VT100/ANSI terminal emulator.
pub struct Vt100Engine {
    term: Term<EngineListener>,
    processor: Processor,
    tap: SequenceTap,
    scrollback: RingBuffer<StyledLine>,
    title: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for Vt100Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vt100Engine")
            .field("size", &self.size())
            .field("cursor", &self.cursor_position())
            .field("scrollback", &self.scrollback_count())
            .finish_non_exhaustive()
    }
}

impl Vt100Engine {
    /// Create an engine with [`DEFAULT_SCROLLBACK_LINES`] of history.
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Self {
        Self::with_scrollback(rows, cols, DEFAULT_SCROLLBACK_LINES)
    }

    /// Create an engine keeping at most `scrollback_lines` of history.
    ///
    /// Zero-sized dimensions are raised to 1, as is a zero scrollback.
    #[must_use]
    pub fn with_scrollback(rows: u16, cols: u16, scrollback_lines: usize) -> Self {
        let capacity = scrollback_lines.max(1);
        let listener = EngineListener::default();
        let title = Arc::clone(&listener.title);

        // The grid history only has to hold what one call can scroll off;
        // anything beyond the ring capacity would be dropped anyway.
        let config = Config {
            scrolling_history: capacity,
            ..Config::default()
        };

        Self {
            term: Term::new(config, &TermSize::new(rows, cols), listener),
            processor: Processor::new(),
            tap: SequenceTap::new(),
            scrollback: RingBuffer::new(capacity),
            title,
        }
    }

    /// Feed raw terminal output through the emulator.
    ///
    /// Sequences split across calls are carried over by the parser.
    pub fn process(&mut self, bytes: &[u8]) {
        self.finish_expired_sync();
        self.processor.advance(&mut self.term, bytes);

        self.tap.advance(bytes);
        if std::mem::take(&mut self.tap.seen.erase_saved_lines) {
            self.scrollback.clear();
        }

        self.collect_history();
    }

    /// Resize the visible screen. Scrollback is preserved.
    ///
    /// Shrinking pushes rows above the cursor into scrollback so the
    /// cursor line stays visible.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.term.resize(TermSize::new(rows, cols));
        self.collect_history();
    }

    /// Current (rows, cols).
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        let grid = self.term.grid();
        (grid.screen_lines() as u16, grid.columns() as u16)
    }

    /// The visible grid, exactly `rows` lines of `cols` cells.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, reason = "screen rows fit in u16")]
    pub fn screen(&self) -> Vec<StyledLine> {
        let grid = self.term.grid();
        let cols = grid.columns();
        (0..grid.screen_lines())
            .map(|row| StyledLine::from_row(&grid[Line(row as i32)], cols))
            .collect()
    }

    /// The visible grid as plain text, one string per row.
    #[must_use]
    pub fn screen_text(&self) -> Vec<String> {
        self.screen().iter().map(StyledLine::text).collect()
    }

    /// Re-serialize the screen as ANSI (cursor hidden while drawing).
    #[must_use]
    pub fn screen_as_ansi(&self) -> Vec<u8> {
        render::render_screen_as_ansi(&self.term)
    }

    /// Stable hash of the visible content and cursor position.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        render::compute_screen_hash(&self.term)
    }

    /// All scrollback lines, oldest first.
    #[must_use]
    pub fn scrollback(&self) -> Vec<StyledLine> {
        self.scrollback.to_vec()
    }

    /// Number of lines currently in scrollback.
    #[must_use]
    pub fn scrollback_count(&self) -> usize {
        self.scrollback.len()
    }

    /// Up to `limit` scrollback lines ending `offset` lines before the newest.
    ///
    /// `offset == 0` returns the most recent history. Lines come back oldest
    /// first. An offset past the start of history yields an empty vec.
    #[must_use]
    pub fn scrollback_lines(&self, offset: usize, limit: usize) -> Vec<StyledLine> {
        let end = self.scrollback.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        self.scrollback
            .iter()
            .skip(start)
            .take(end - start)
            .cloned()
            .collect()
    }

    /// Cursor (row, col), 0-based.
    #[must_use]
    pub fn cursor_position(&self) -> (u16, u16) {
        let point = self.term.grid().cursor.point;
        (point.line.0 as u16, point.column.0 as u16)
    }

    /// Whether the application has the cursor shown (DECTCEM).
    #[must_use]
    pub fn cursor_visible(&self) -> bool {
        self.term.mode().contains(TermMode::SHOW_CURSOR)
    }

    /// Window title set via OSC 0 / OSC 2, empty if none.
    #[must_use]
    pub fn title(&self) -> String {
        self.title
            .lock()
            .expect("title lock poisoned")
            .clone()
            .unwrap_or_default()
    }

    /// True while the application is on the alternate screen.
    #[must_use]
    pub fn is_alternate_screen(&self) -> bool {
        self.term.mode().contains(TermMode::ALT_SCREEN)
    }

    /// Drain OSC 9 / OSC 777 notifications seen since the last call.
    pub fn take_notifications(&mut self) -> Vec<AgentNotification> {
        std::mem::take(&mut self.tap.seen.notifications)
    }

    /// Move grid history into the ring, oldest first, then clear it.
    #[allow(clippy::cast_possible_wrap, reason = "history is capped far below i32::MAX")]
    fn collect_history(&mut self) {
        let grid = self.term.grid();
        let history = grid.history_size();
        if history == 0 {
            return;
        }

        let cols = grid.columns();
        for depth in (1..=history).rev() {
            let line = StyledLine::from_row(&grid[Line(-(depth as i32))], cols);
            self.scrollback.push(line);
        }
        self.term.grid_mut().clear_history();
    }

    /// End a synchronized update (DEC 2026) whose deadline has passed.
    ///
    /// The processor buffers output between begin and end markers; an
    /// application that never sends the end marker would freeze the screen.
    fn finish_expired_sync(&mut self) {
        let expired = self
            .processor
            .sync_timeout()
            .sync_timeout()
            .is_some_and(|deadline| deadline <= Instant::now());
        if expired {
            self.processor.stop_sync(&mut self.term);
        }
    }
}
