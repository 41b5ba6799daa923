//! Live/scroll display mode for terminal views.
//!
//! A view is either **live** (offset 0: render the screen, keys go to the
//! PTY) or **scrolling** (offset > 0: render a window `offset` lines above
//! the live bottom of `scrollback + screen`, keys are navigation only).
//!
//! Navigation only changes the offset; it never touches the PTY. Every
//! transition between the two modes, whichever operation caused it,
//! reports [`ScrollEvent::ModeChanged`]. Moves that stay in scroll mode
//! report [`ScrollEvent::Moved`].

// Rust guideline compliant 2026-02

use crate::terminal::StyledLine;

/// Lines moved by one page up/down.
pub const PAGE_LINES: usize = 20;

/// Change produced by a scroll operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollEvent {
    /// The view entered (`true`) or left (`false`) scroll mode.
    ModeChanged {
        /// Whether the view is now in scroll mode.
        scrolling: bool,
    },
    /// The offset changed within scroll mode.
    Moved {
        /// New offset in lines above the live bottom.
        offset: usize,
    },
}

/// Scroll position of one view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrollState {
    offset: usize,
}

impl ScrollState {
    /// A live view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines above the live bottom (0 = live).
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True while showing history.
    #[must_use]
    pub fn is_scrolling(&self) -> bool {
        self.offset > 0
    }

    /// Whether keystrokes should be forwarded to the PTY.
    #[must_use]
    pub fn routes_keys_to_pty(&self) -> bool {
        !self.is_scrolling()
    }

    /// Move to `offset`, clamped to `max` (the scrollback length).
    pub fn set_offset(&mut self, offset: usize, max: usize) -> Option<ScrollEvent> {
        let old = self.offset;
        let new = offset.min(max);
        if new == old {
            return None;
        }
        self.offset = new;

        match (old, new) {
            (0, _) => Some(ScrollEvent::ModeChanged { scrolling: true }),
            (_, 0) => Some(ScrollEvent::ModeChanged { scrolling: false }),
            _ => Some(ScrollEvent::Moved { offset: new }),
        }
    }

    /// Scroll `lines` further into history.
    pub fn up(&mut self, lines: usize, max: usize) -> Option<ScrollEvent> {
        self.set_offset(self.offset.saturating_add(lines), max)
    }

    /// Scroll `lines` back toward live output.
    pub fn down(&mut self, lines: usize) -> Option<ScrollEvent> {
        self.set_offset(self.offset.saturating_sub(lines), self.offset)
    }

    /// One line up.
    pub fn line_up(&mut self, max: usize) -> Option<ScrollEvent> {
        self.up(1, max)
    }

    /// One line down.
    pub fn line_down(&mut self) -> Option<ScrollEvent> {
        self.down(1)
    }

    /// One page ([`PAGE_LINES`]) up.
    pub fn page_up(&mut self, max: usize) -> Option<ScrollEvent> {
        self.up(PAGE_LINES, max)
    }

    /// One page ([`PAGE_LINES`]) down.
    pub fn page_down(&mut self) -> Option<ScrollEvent> {
        self.down(PAGE_LINES)
    }

    /// Jump to the oldest history line.
    pub fn to_top(&mut self, max: usize) -> Option<ScrollEvent> {
        self.set_offset(max, max)
    }

    /// Jump back to live output.
    pub fn to_bottom(&mut self) -> Option<ScrollEvent> {
        self.set_offset(0, 0)
    }

    /// Leave scroll mode explicitly. Same as [`to_bottom()`](Self::to_bottom).
    pub fn exit(&mut self) -> Option<ScrollEvent> {
        self.to_bottom()
    }
}

/// Which history lines a window at `offset` needs, as the
/// `(offset, limit)` arguments for `scrollback_lines`.
///
/// `rows` is the screen height.
#[must_use]
pub fn history_request(offset: usize, rows: usize) -> (usize, usize) {
    (offset.saturating_sub(rows), offset.min(rows))
}

/// Compose the visible window from the history slice returned for
/// [`history_request`] and the live screen.
#[must_use]
pub fn compose_window(
    mut history: Vec<StyledLine>,
    screen: &[StyledLine],
    offset: usize,
) -> Vec<StyledLine> {
    let rows = screen.len();
    let from_screen = rows.saturating_sub(offset);
    history.extend_from_slice(&screen[..from_screen]);
    history
}
