//! Pane layout and summary-grid geometry.
//!
//! Layout is a pure function of (flags, terminal size); the reducer
//! stores the result so mouse events can be hit-tested against the same
//! rectangles the renderer drew.

use ratatui::layout::{Constraint, Direction, Layout, Rect};

use crate::state::{Orientation, Pane};

/// Below these dimensions panes stop making sense; rendering clips to a
/// resize banner instead.
pub const MIN_WIDTH: u16 = 10;
pub const MIN_HEIGHT: u16 = 20;

/// Each status cell is a glyph plus a gutter column.
pub const CELL_WIDTH: u16 = 2;

/// Where everything goes this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaneLayout {
    pub summary: Rect,
    pub result: Rect,
    pub log: Option<Rect>,
    pub status_bar: Rect,
    pub too_small: bool,
}

/// Computes the frame layout.
pub fn compute(
    orientation: Orientation,
    log_visible: bool,
    fullscreen: bool,
    focus: Pane,
    area: Rect,
) -> PaneLayout {
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        return PaneLayout {
            summary: Rect::default(),
            result: Rect::default(),
            log: None,
            status_bar: Rect::default(),
            too_small: true,
        };
    }
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);
    let main = vertical[0];
    let status_bar = vertical[1];

    if fullscreen {
        let (summary, result) = match focus {
            Pane::Summary => (main, Rect::default()),
            Pane::Result => (Rect::default(), main),
        };
        return PaneLayout {
            summary,
            result,
            log: None,
            status_bar,
            too_small: false,
        };
    }

    match orientation {
        Orientation::Landscape => {
            // Summary strip on top, result below.
            let strip = (main.height / 4).max(10).min(main.height.saturating_sub(3));
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(strip), Constraint::Min(1)])
                .split(main);
            let (summary, log) = split_with_log(rows[0], log_visible, Direction::Horizontal);
            PaneLayout {
                summary,
                result: rows[1],
                log,
                status_bar,
                too_small: false,
            }
        }
        Orientation::Portrait => {
            // Summary column on the left, result to the right.
            let cols = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(main);
            let (summary, log) = split_with_log(cols[0], log_visible, Direction::Vertical);
            PaneLayout {
                summary,
                result: cols[1],
                log,
                status_bar,
                too_small: false,
            }
        }
    }
}

fn split_with_log(
    area: Rect,
    log_visible: bool,
    direction: Direction,
) -> (Rect, Option<Rect>) {
    if !log_visible {
        return (area, None);
    }
    let parts = match direction {
        Direction::Horizontal => Layout::default()
            .direction(direction)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area),
        Direction::Vertical => {
            let log_height = (area.height / 4).max(6).min(area.height.saturating_sub(3));
            Layout::default()
                .direction(direction)
                .constraints([Constraint::Min(1), Constraint::Length(log_height)])
                .split(area)
        }
    };
    (parts[0], Some(parts[1]))
}

/// Maps a mouse position inside the summary pane to a (row, column)
/// candidate; the caller clamps the column to the row's width.
pub fn summary_cell_at(
    summary: Rect,
    scroll: usize,
    column: u16,
    row: u16,
) -> Option<(usize, usize)> {
    // One-cell border on every side.
    let inner = inner_rect(summary)?;
    if column < inner.x
        || column >= inner.x + inner.width
        || row < inner.y
        || row >= inner.y + inner.height
    {
        return None;
    }
    let grid_row = (row - inner.y) as usize + scroll;
    let grid_col = ((column - inner.x) / CELL_WIDTH) as usize;
    Some((grid_row, grid_col))
}

/// The area inside a pane border.
pub fn inner_rect(area: Rect) -> Option<Rect> {
    if area.width < 3 || area.height < 3 {
        return None;
    }
    Some(Rect {
        x: area.x + 1,
        y: area.y + 1,
        width: area.width - 2,
        height: area.height - 2,
    })
}
