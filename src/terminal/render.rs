//! Screen rendering utilities for terminal output.
//!
//! Converts the emulator's visible grid into an ANSI byte stream suitable
//! for replaying on a remote terminal, and computes change-detection hashes.
//!
//! # Performance
//!
//! These functions are on the hot path for terminal streaming:
//! - Pre-allocated string buffers with capacity hints
//! - Attribute change detection to minimize escape sequence output
//! - Trailing blank cells are never emitted

// Rust guideline compliant 2026-02

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write;
use std::hash::{Hash, Hasher};

use alacritty_terminal::event::EventListener;
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::{Term, TermMode};

use super::cell::{Cell, CellAttrs, Color};

/// Render a terminal screen as ANSI escape sequences.
///
/// Output is bracketed by cursor hide/show so replaying it does not
/// flicker. It resets attributes, clears the screen, draws every row at an
/// absolute position, then parks the cursor where the terminal has it. The
/// trailing show-cursor is omitted when the application hid the cursor.
#[must_use]
#[allow(clippy::cast_possible_wrap, reason = "screen rows fit in u16")]
pub fn render_screen_as_ansi<T: EventListener>(term: &Term<T>) -> Vec<u8> {
    let grid = term.grid();
    let rows = grid.screen_lines();
    let cols = grid.columns();

    // Estimate capacity: ~20 bytes per cell average for attributes + content
    let mut output = String::with_capacity(rows * cols * 20);

    // Hide cursor during update to prevent flicker
    output.push_str("\x1b[?25l");

    // Reset attributes, clear screen and scrollback, move to home
    output.push_str("\x1b[0m\x1b[2J\x1b[3J\x1b[H");

    for row in 0..rows {
        let grid_row = &grid[Line(row as i32)];
        let cells: Vec<Cell> = (0..cols).map(|col| Cell::from(&grid_row[Column(col)])).collect();
        let Some(last) = cells.iter().rposition(|c| !c.is_blank()) else {
            continue;
        };
        let _ = write!(output, "\x1b[{};1H", row + 1);

        let mut pen = CellAttrs::default();
        for (col, cell) in cells[..=last].iter().enumerate() {
            if cell.spacer {
                continue;
            }
            if cell.attrs != pen {
                output.push_str("\x1b[0m");
                write_attrs(&mut output, &cell.attrs);
                pen = cell.attrs;
            }
            output.push(cell.ch);
            if let Some(marks) = grid_row[Column(col)].zerowidth() {
                output.extend(marks);
            }
        }
        if !pen.is_default() {
            output.push_str("\x1b[0m");
        }
    }

    output.push_str("\x1b[0m");

    // Position cursor
    let cursor = grid.cursor.point;
    let _ = write!(output, "\x1b[{};{}H", cursor.line.0 + 1, cursor.column.0 + 1);

    if term.mode().contains(TermMode::SHOW_CURSOR) {
        output.push_str("\x1b[?25h");
    }

    output.into_bytes()
}

fn write_attrs(output: &mut String, attrs: &CellAttrs) {
    write_color_sequence(output, attrs.fg, true);
    write_color_sequence(output, attrs.bg, false);

    if attrs.bold {
        output.push_str("\x1b[1m");
    }
    if attrs.dim {
        output.push_str("\x1b[2m");
    }
    if attrs.italic {
        output.push_str("\x1b[3m");
    }
    if attrs.underline {
        output.push_str("\x1b[4m");
    }
    if attrs.inverse {
        output.push_str("\x1b[7m");
    }
    if attrs.strikethrough {
        output.push_str("\x1b[9m");
    }
}

/// Write a color escape sequence to the output.
///
/// `is_foreground` selects SGR 38 (true) or 48 (false).
fn write_color_sequence(output: &mut String, color: Color, is_foreground: bool) {
    let base = if is_foreground { 38 } else { 48 };

    match color {
        Color::Default => {}
        Color::Idx(i) => {
            let _ = write!(output, "\x1b[{base};5;{i}m");
        }
        Color::Rgb(r, g, b) => {
            let _ = write!(output, "\x1b[{base};2;{r};{g};{b}m");
        }
    }
}

/// Compute a hash of the screen content for change detection.
///
/// Covers every visible cell (text and attributes) and the cursor
/// position. Parser state never enters the hash, so identical output fed in
/// any chunking yields the same value.
#[must_use]
#[allow(clippy::cast_possible_wrap, reason = "screen rows fit in u16")]
pub fn compute_screen_hash<T: EventListener>(term: &Term<T>) -> u64 {
    let grid = term.grid();
    let mut hasher = DefaultHasher::new();
    for row in 0..grid.screen_lines() {
        let grid_row = &grid[Line(row as i32)];
        for col in 0..grid.columns() {
            Cell::from(&grid_row[Column(col)]).hash(&mut hasher);
        }
    }
    let cursor = grid.cursor.point;
    (cursor.line.0, cursor.column.0).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::Vt100Engine;

    // Strip ANSI escape sequences to verify content
    fn strip_ansi(s: &str) -> String {
        let mut result = String::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                // Skip until we hit a letter (end of escape sequence)
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else {
                result.push(c);
            }
        }
        result
    }

    #[test]
    fn test_render_empty_screen() {
        let engine = Vt100Engine::new(24, 80);
        let output = String::from_utf8(engine.screen_as_ansi()).unwrap();

        assert!(output.starts_with("\x1b[?25l"));
        assert!(output.ends_with("\x1b[?25h"));
    }

    #[test]
    fn test_render_screen_with_content() {
        let mut engine = Vt100Engine::new(24, 80);
        engine.process(b"Hello, World!\r\n");

        let output = String::from_utf8(engine.screen_as_ansi()).unwrap();
        assert!(strip_ansi(&output).contains("Hello, World!"));
    }

    #[test]
    fn test_render_hidden_cursor_omits_show() {
        let mut engine = Vt100Engine::new(5, 20);
        engine.process(b"\x1b[?25l");

        let output = String::from_utf8(engine.screen_as_ansi()).unwrap();
        assert!(!output.contains("\x1b[?25h"));
    }

    #[test]
    fn test_render_emits_colors_once_per_run() {
        let mut engine = Vt100Engine::new(5, 20);
        engine.process(b"\x1b[31mred\x1b[0m plain");

        let output = String::from_utf8(engine.screen_as_ansi()).unwrap();
        assert_eq!(output.matches("\x1b[38;5;1m").count(), 1);
        assert!(output.contains("red"));
    }

    #[test]
    fn test_replaying_render_reproduces_screen() {
        let mut source = Vt100Engine::new(6, 30);
        source.process(b"\x1b[1;32mok\x1b[0m line one\r\n\x1b[44m  \x1b[0m\r\n\x1b[4;5Htab\there");

        let mut replica = Vt100Engine::new(6, 30);
        replica.process(&source.screen_as_ansi());

        assert_eq!(replica.screen(), source.screen());
        assert_eq!(replica.cursor_position(), source.cursor_position());
    }

    #[test]
    fn test_compute_screen_hash_changes_with_content() {
        let mut engine = Vt100Engine::new(24, 80);
        let hash1 = engine.content_hash();

        engine.process(b"Some new content\r\n");
        assert_ne!(hash1, engine.content_hash());
    }

    #[test]
    fn test_compute_screen_hash_stable_for_same_content() {
        let mut engine1 = Vt100Engine::new(24, 80);
        let mut engine2 = Vt100Engine::new(24, 80);

        engine1.process(b"Same content\r\n");
        engine2.process(b"Same content\r\n");

        assert_eq!(engine1.content_hash(), engine2.content_hash());
    }
}
