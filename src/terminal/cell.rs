//! Screen cell model.
//!
//! A [`StyledLine`] is one row of [`Cell`]s copied out of the emulator
//! grid. Lines are the unit stored in scrollback and returned by
//! [`Vt100Engine::screen()`](super::Vt100Engine::screen).

// Rust guideline compliant 2026-02

use alacritty_terminal::grid::Row;
use alacritty_terminal::index::Column;
use alacritty_terminal::term::cell::{Cell as GridCell, Flags};
use alacritty_terminal::vte::ansi::{Color as AnsiColor, NamedColor};

/// Terminal color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Color {
    /// Terminal default color.
    #[default]
    Default,
    /// Indexed palette color (0-15 named, 16-255 extended).
    Idx(u8),
    /// 24-bit truecolor.
    Rgb(u8, u8, u8),
}

impl From<AnsiColor> for Color {
    fn from(color: AnsiColor) -> Self {
        match color {
            AnsiColor::Spec(rgb) => Self::Rgb(rgb.r, rgb.g, rgb.b),
            AnsiColor::Indexed(i) => Self::Idx(i),
            // Foreground, Background, Cursor and the dim variants are
            // palette slots, not indices.
            AnsiColor::Named(named) => named_index(named).map_or(Self::Default, Self::Idx),
        }
    }
}

fn named_index(named: NamedColor) -> Option<u8> {
    let index = named as usize;
    (index < 16).then_some(index as u8)
}

/// Graphic rendition of a cell (the SGR "pen").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "each flag maps to one independent SGR attribute"
)]
pub struct CellAttrs {
    /// Foreground color.
    pub fg: Color,
    /// Background color.
    pub bg: Color,
    /// SGR 1.
    pub bold: bool,
    /// SGR 2.
    pub dim: bool,
    /// SGR 3.
    pub italic: bool,
    /// SGR 4 and its curly/double variants.
    pub underline: bool,
    /// SGR 7.
    pub inverse: bool,
    /// SGR 9.
    pub strikethrough: bool,
}

impl CellAttrs {
    /// True if these are the terminal's default attributes.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// One character cell.
///
/// A wide (two-column) glyph occupies its own cell plus a following
/// spacer cell whose `spacer` flag is set and whose `ch` is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    /// Character in this cell (`' '` when blank).
    pub ch: char,
    /// Rendition.
    pub attrs: CellAttrs,
    /// True if this cell holds a double-width glyph.
    pub wide: bool,
    /// True if this cell is the right half of a wide glyph.
    pub spacer: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            attrs: CellAttrs::default(),
            wide: false,
            spacer: false,
        }
    }
}

impl Cell {
    /// True if the cell shows nothing and carries no styling.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        !self.spacer && self.ch == ' ' && self.attrs.is_default()
    }
}

impl From<&GridCell> for Cell {
    fn from(cell: &GridCell) -> Self {
        let flags = cell.flags;
        Self {
            // Tab stops are stored as '\t' in the first skipped cell.
            // Combining marks (`cell.zerowidth()`) are not carried.
            ch: match cell.c {
                '\0' | '\t' => ' ',
                c => c,
            },
            attrs: CellAttrs {
                fg: cell.fg.into(),
                bg: cell.bg.into(),
                bold: flags.contains(Flags::BOLD),
                dim: flags.contains(Flags::DIM),
                italic: flags.contains(Flags::ITALIC),
                underline: flags.intersects(Flags::ALL_UNDERLINES),
                inverse: flags.contains(Flags::INVERSE),
                strikethrough: flags.contains(Flags::STRIKEOUT),
            },
            wide: flags.contains(Flags::WIDE_CHAR),
            spacer: flags.contains(Flags::WIDE_CHAR_SPACER),
        }
    }
}

/// One row of styled cells.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StyledLine {
    /// Cells, one per column.
    pub cells: Vec<Cell>,
    /// True if the row ended because the cursor auto-wrapped into the next row.
    pub wrapped: bool,
}

impl StyledLine {
    /// Copy the first `cols` cells of an emulator grid row.
    #[must_use]
    pub fn from_row(row: &Row<GridCell>, cols: usize) -> Self {
        let cells: Vec<Cell> = (0..cols).map(|col| Cell::from(&row[Column(col)])).collect();
        let wrapped = cols > 0 && row[Column(cols - 1)].flags.contains(Flags::WRAPLINE);
        Self { cells, wrapped }
    }

    /// Plain text of the line with trailing whitespace trimmed.
    #[must_use]
    pub fn text(&self) -> String {
        let text: String = self
            .cells
            .iter()
            .filter(|c| !c.spacer)
            .map(|c| c.ch)
            .collect();
        text.trim_end().to_string()
    }

    /// True if every cell is blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_blank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alacritty_terminal::vte::ansi::Rgb;

    fn line_of(cells: Vec<Cell>) -> StyledLine {
        StyledLine {
            cells,
            wrapped: false,
        }
    }

    #[test]
    fn test_blank_line_text_is_empty() {
        let line = line_of(vec![Cell::default(); 10]);
        assert_eq!(line.text(), "");
        assert!(line.is_blank());
    }

    #[test]
    fn test_text_skips_spacers_and_trims() {
        let mut cells = vec![Cell::default(); 6];
        cells[0].ch = '漢';
        cells[0].wide = true;
        cells[1].spacer = true;
        cells[2].ch = 'a';
        assert_eq!(line_of(cells).text(), "漢a");
    }

    #[test]
    fn test_colored_blank_is_not_blank() {
        let cell = Cell {
            attrs: CellAttrs {
                bg: Color::Idx(4),
                ..CellAttrs::default()
            },
            ..Cell::default()
        };
        assert!(!cell.is_blank());
    }

    #[test]
    fn test_named_colors_map_to_palette_indices() {
        assert_eq!(Color::from(AnsiColor::Named(NamedColor::Red)), Color::Idx(1));
        assert_eq!(
            Color::from(AnsiColor::Named(NamedColor::BrightWhite)),
            Color::Idx(15)
        );
        assert_eq!(
            Color::from(AnsiColor::Named(NamedColor::Foreground)),
            Color::Default
        );
        assert_eq!(
            Color::from(AnsiColor::Named(NamedColor::Background)),
            Color::Default
        );
    }

    #[test]
    fn test_indexed_and_rgb_colors_pass_through() {
        assert_eq!(Color::from(AnsiColor::Indexed(200)), Color::Idx(200));
        assert_eq!(
            Color::from(AnsiColor::Spec(Rgb { r: 1, g: 2, b: 3 })),
            Color::Rgb(1, 2, 3)
        );
    }
}
