//! Status colors and conversion from the styled-text model to ratatui.
//!
//! Styles carry 24-bit colors; when the terminal does not advertise
//! true color everything is folded down to the 16-color palette, and the
//! status swatches switch to letter glyphs so the states stay
//! distinguishable even on themes that remap colors.

use lookout_core::config::Theme;
use lookout_core::report::Status;
use lookout_core::textstyle::{ColorSpec, Style as TextStyle, StyledText};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Color reduction mode, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMode {
    pub truecolor: bool,
    pub theme: Theme,
}

impl ColorMode {
    pub fn new(truecolor: bool, theme: Theme) -> Self {
        Self { truecolor, theme }
    }

    fn color(&self, spec: ColorSpec) -> Option<Color> {
        match (self.theme, spec) {
            (_, ColorSpec::Default) => None,
            (Theme::Mono, _) => None,
            (Theme::Default, ColorSpec::Indexed(i)) => Some(Color::Indexed(i)),
            (Theme::Default, ColorSpec::Rgb(r, g, b)) => {
                if self.truecolor {
                    Some(Color::Rgb(r, g, b))
                } else {
                    Some(Color::Indexed(nearest_basic(r, g, b)))
                }
            }
        }
    }

    pub fn style(&self, style: TextStyle) -> Style {
        let mut out = Style::default();
        if let Some(fg) = self.color(style.fg) {
            out = out.fg(fg);
        }
        if let Some(bg) = self.color(style.bg) {
            out = out.bg(bg);
        }
        if style.bold {
            out = out.add_modifier(Modifier::BOLD);
        }
        if style.italic {
            out = out.add_modifier(Modifier::ITALIC);
        }
        if style.underline {
            out = out.add_modifier(Modifier::UNDERLINED);
        }
        out
    }

    /// One styled-text line to a ratatui line.
    pub fn line(&self, text: &StyledText) -> Line<'static> {
        let spans: Vec<Span<'static>> = text
            .spans()
            .iter()
            .map(|span| Span::styled(span.text.clone(), self.style(span.style)))
            .collect();
        Line::from(spans)
    }

    /// A whole body to ratatui lines.
    pub fn lines(&self, text: &StyledText) -> Vec<Line<'static>> {
        text.lines().iter().map(|line| self.line(line)).collect()
    }

    /// The status swatch: glyph plus style for one grid cell. In
    /// reduced-color mode the glyphs alone are enough to tell statuses
    /// apart.
    pub fn status_cell(&self, status: Status, selected: bool) -> Span<'static> {
        let (truecolor_glyph, fallback_glyph, color) = match status {
            Status::Pending => (".", ".", None),
            Status::Running => ("●", "R", Some((0xe5, 0xc0, 0x7b))),
            Status::Ok => ("●", "o", Some((0x98, 0xc3, 0x79))),
            Status::Problem => ("●", "P", Some((0xe0, 0x6c, 0x75))),
            Status::NotApplicable => ("·", "-", Some((0x5c, 0x63, 0x70))),
            Status::TimedOut => ("●", "T", Some((0xc6, 0x78, 0xdd))),
            Status::Error => ("E", "E", Some((0xe0, 0x6c, 0x75))),
            Status::Paused => ("=", "=", Some((0x56, 0xb6, 0xc2))),
        };
        let glyph = if self.truecolor {
            truecolor_glyph
        } else {
            fallback_glyph
        };
        let mut style = match (self.theme, color) {
            (Theme::Default, Some((r, g, b))) => {
                let spec = ColorSpec::Rgb(r, g, b);
                self.style(TextStyle::fg(spec))
            }
            _ => Style::default(),
        };
        if selected {
            style = style.add_modifier(Modifier::REVERSED);
        }
        Span::styled(glyph.to_string(), style)
    }

    /// Accent style for a tool name.
    pub fn tool_style(&self, color: (u8, u8, u8)) -> Style {
        match self.theme {
            Theme::Mono => Style::default().add_modifier(Modifier::BOLD),
            Theme::Default => self
                .style(TextStyle::fg(ColorSpec::Rgb(color.0, color.1, color.2)))
                .add_modifier(Modifier::BOLD),
        }
    }
}

/// Nearest of the 16 basic colors, by which channels clear a midpoint.
fn nearest_basic(r: u8, g: u8, b: u8) -> u8 {
    let bright = u16::from(r) + u16::from(g) + u16::from(b) > 384;
    let bit = |c: u8| u8::from(c > 96);
    let index = bit(r) | (bit(g) << 1) | (bit(b) << 2);
    if bright { index + 8 } else { index }
}
