//! Pure rendering: reads the model, draws the frame, mutates nothing.
//!
//! Determinism matters here: the same model and terminal size always
//! produce the same buffer, which is what makes the renderer testable
//! against a test backend.

use lookout_core::config::Theme;
use lookout_core::report::Status;
use lookout_core::textstyle::StyledText;
use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph};

use crate::layout::{CELL_WIDTH, inner_rect};
use crate::state::{Model, Pane};

const HELP_TEXT: &str = "\
Lookout watches a codebase and keeps a report matrix up to date.

Keys:
  arrows, page up/down, home/end, mouse
                 Move the cursor or scroll the result pane.
  tab            Switch focus between summary and result pane.
  h              This help. (toggle)
  q              Quit.
  o, t           Turn the result pane to portrait or landscape. (toggle)
  l              Show the activity log. (toggle)
  e              Edit the current file ($EDITOR, $VISUAL or --editor).
  x              Open the current file with the system handler.
  n              Move to the next issue.
  N              Move to the next issue of the current tool.
  p              Pause workers. (toggle)
  s              Order files by type, or by directory. (toggle)
  r              Refresh the selected report.
  R              Refresh every report of the selected tool.
  f              Resize the focused pane to the full screen. (toggle)

Statuses:
  .  pending        report not computed yet
  R  running        assigned to a worker
  o  ok             tool reported success
  P  problem        tool reported defects
  -  not applicable tool declined the file
  T  timed out      tool exceeded its time budget
  E  error          tool or worker failed
  =  paused         was running when workers were paused";

/// Renders the whole frame.
pub fn render(model: &Model, frame: &mut Frame) {
    let area = frame.area();
    if model.layout.too_small {
        let banner = Paragraph::new("Terminal too small.\nPlease resize.")
            .alignment(Alignment::Center);
        frame.render_widget(banner, area);
        return;
    }
    if model.help_visible {
        render_help(model, frame, area);
        return;
    }

    render_summary(model, frame, model.layout.summary);
    render_result(model, frame, model.layout.result);
    if let Some(log_area) = model.layout.log {
        render_log(model, frame, log_area);
    }
    render_status_bar(model, frame, model.layout.status_bar);
}

fn pane_block(title: Line<'static>, focused: bool) -> Block<'static> {
    let border_type = if focused {
        BorderType::Thick
    } else {
        BorderType::Plain
    };
    let border_style = if focused {
        Style::default()
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style)
        .title(title)
}

fn render_help(model: &Model, frame: &mut Frame, area: Rect) {
    let block = pane_block(Line::from("Help"), true);
    let paragraph = Paragraph::new(HELP_TEXT)
        .block(block)
        .scroll((model.help_scroll as u16, 0));
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn render_summary(model: &Model, frame: &mut Frame, area: Rect) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let title = Line::from(format!("Summary of {}", model.root_name));
    let block = pane_block(title, model.focus_pane == Pane::Summary);
    frame.render_widget(block, area);
    let Some(inner) = inner_rect(area) else { return };

    if model.rows.is_empty() {
        let empty = Paragraph::new("No files.").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, inner);
        return;
    }

    let grid_width = model.max_columns() * CELL_WIDTH as usize;
    let mut lines: Vec<Line<'static>> = Vec::with_capacity(inner.height as usize);
    let end = (model.summary_scroll + inner.height as usize).min(model.rows.len());
    for row_index in model.summary_scroll..end {
        let row = &model.rows[row_index];
        let is_cursor_row = row_index == model.cursor.0;
        let mut spans: Vec<Span<'static>> = Vec::with_capacity(row.entries.len() * 2 + 2);
        for (col_index, entry) in row.entries.iter().enumerate() {
            let selected = is_cursor_row && col_index == model.cursor.1;
            spans.push(
                model
                    .mode
                    .status_cell(entry.display_status(), selected),
            );
            spans.push(Span::raw(" "));
        }
        let used = row.entries.len() * CELL_WIDTH as usize;
        spans.push(Span::raw(" ".repeat(grid_width.saturating_sub(used) + 1)));
        for span in model.mode.line(&model.paths.style_path(&row.path)).spans {
            spans.push(span);
        }
        let mut line = Line::from(spans);
        if is_cursor_row {
            line.style = row_highlight(model);
        }
        lines.push(line);
    }
    frame.render_widget(Paragraph::new(lines), inner);
}

fn row_highlight(model: &Model) -> Style {
    match model.mode.theme {
        Theme::Mono => Style::default().add_modifier(Modifier::UNDERLINED),
        Theme::Default => Style::default().bg(Color::Indexed(236)),
    }
}

fn render_result(model: &Model, frame: &mut Frame, area: Rect) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let title = match (model.current_row(), model.current_entry()) {
        (Some(row), Some(entry)) => {
            let mut spans = model.mode.line(&model.paths.style_path(&row.path)).spans;
            spans.push(Span::raw(" ── "));
            spans.push(Span::styled(
                entry.tool.name.to_string(),
                model.mode.tool_style(entry.tool.color),
            ));
            spans.push(Span::raw(format!(" [{}]", entry.display_status().label())));
            Line::from(spans)
        }
        _ => Line::from("Result"),
    };
    let block = pane_block(title, model.focus_pane == Pane::Result);
    frame.render_widget(&block, area);
    let Some(inner) = inner_rect(area) else { return };

    let Some(entry) = model.current_entry() else {
        return;
    };
    match &entry.body {
        Some(body) => {
            let lines = model.mode.lines(body);
            let paragraph = Paragraph::new(lines)
                .scroll((entry.scroll.1 as u16, entry.scroll.0 as u16));
            frame.render_widget(paragraph, inner);
        }
        None => {
            let placeholder = match entry.display_status() {
                Status::Pending => "Waiting to run...",
                Status::Running => "Running...",
                Status::Paused => "Paused.",
                _ => "No stored report body.",
            };
            let paragraph =
                Paragraph::new(placeholder).style(Style::default().fg(Color::DarkGray));
            frame.render_widget(paragraph, inner);
        }
    }
}

fn render_log(model: &Model, frame: &mut Frame, area: Rect) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let block = pane_block(Line::from("Log"), false);
    frame.render_widget(&block, area);
    let Some(inner) = inner_rect(area) else { return };

    let height = inner.height as usize;
    let skip = model.log.len().saturating_sub(height);
    let lines: Vec<Line<'static>> = model
        .log
        .lines()
        .skip(skip)
        .map(|line| model.mode.line(line))
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_status_bar(model: &Model, frame: &mut Frame, area: Rect) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let hints =
        " h:help q:quit tab:focus t:turn l:log e:edit x:open n:issue s:sort r:refresh p:pause f:full";
    let state = if model.paused {
        Span::styled("paused ", Style::default().fg(Color::Yellow))
    } else {
        Span::styled("running", Style::default().fg(Color::Cyan))
    };
    let indicators = format!(
        "  order:{}  {}/{} ",
        model.sort.label(),
        model.settled_total(),
        model.entry_total()
    );
    let bar = StyledText::plain(hints).truncate(
        (area.width as usize).saturating_sub(indicators.len() + "paused ".len()),
    );
    let used = bar.width();
    let mut spans = model.mode.line(&bar).spans;
    let pad = (area.width as usize)
        .saturating_sub(used + indicators.len() + "paused ".len());
    spans.push(Span::raw(" ".repeat(pad)));
    spans.push(state);
    spans.push(Span::raw(indicators));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UiEvent;
    use crate::update;
    use lookout_core::cache::StatusDb;
    use lookout_core::config::Config;
    use lookout_core::snapshot::FileSnapshot;
    use lookout_core::toolkit::ToolRegistry;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn model_with(paths: &[&str]) -> Model {
        let config = Config::new(PathBuf::from("/codebase"));
        let registry = ToolRegistry::probe_with_path(Some(""));
        let mut scan = BTreeMap::new();
        for (index, path) in paths.iter().enumerate() {
            scan.insert(
                path.to_string(),
                FileSnapshot {
                    size: index as u64,
                    mtime_ns: 1,
                    mode: 0o100644,
                    ino: index as u64 + 1,
                    dev: 1,
                },
            );
        }
        let (mut model, _) = Model::new(&config, registry, scan, None::<StatusDb>);
        let _ = update::update(
            &mut model,
            UiEvent::Frame {
                width: 90,
                height: 30,
            },
        );
        model
    }

    fn draw(model: &Model) -> ratatui::buffer::Buffer {
        let backend = TestBackend::new(90, 30);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| render(model, frame)).unwrap();
        terminal.backend().buffer().clone()
    }

    fn buffer_text(buffer: &ratatui::buffer::Buffer) -> String {
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn rendering_is_deterministic() {
        let model = model_with(&["src/a.py", "src/b.py"]);
        assert_eq!(draw(&model), draw(&model));
    }

    #[test]
    fn summary_shows_paths_and_status_glyphs() {
        let model = model_with(&["src/a.py"]);
        let text = buffer_text(&draw(&model));
        assert!(text.contains("Summary of codebase"));
        assert!(text.contains("src/a.py"));
        // Two pending entries (contents, metadata) render as dots.
        assert!(text.contains(". ."));
    }

    #[test]
    fn help_overlay_replaces_the_panes() {
        let mut model = model_with(&["src/a.py"]);
        model.help_visible = true;
        let text = buffer_text(&draw(&model));
        assert!(text.contains("Move to the next issue"));
        assert!(!text.contains("Summary of codebase"));
    }

    #[test]
    fn tiny_terminals_get_the_resize_banner() {
        let mut model = model_with(&["src/a.py"]);
        let _ = update::update(
            &mut model,
            UiEvent::Frame {
                width: 8,
                height: 5,
            },
        );
        let backend = TestBackend::new(8, 5);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| render(&model, frame)).unwrap();
        let text = buffer_text(&terminal.backend().buffer().clone());
        assert!(text.contains("small"));
    }

    #[test]
    fn status_bar_reports_progress_and_pause() {
        let mut model = model_with(&["src/a.py"]);
        let text = buffer_text(&draw(&model));
        assert!(text.contains("running"));
        assert!(text.contains("0/2"));
        model.paused = true;
        let text = buffer_text(&draw(&model));
        assert!(text.contains("paused"));
    }

    #[test]
    fn result_pane_titles_the_selected_entry() {
        let model = model_with(&["src/a.py"]);
        let text = buffer_text(&draw(&model));
        assert!(text.contains("contents"));
        assert!(text.contains("[pending]"));
        assert!(text.contains("Waiting to run..."));
    }
}
