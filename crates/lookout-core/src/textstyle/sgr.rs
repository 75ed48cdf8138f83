//! Minimal SGR (Select Graphic Rendition) interpreter.
//!
//! Understands the subset tools actually emit: 8/16-color, 256-color and
//! 24-bit foreground/background, bold, faint, italic, underline, reverse,
//! and resets. Everything else in a CSI sequence is consumed and ignored.

use super::{ColorSpec, Style};

/// Applies a raw SGR parameter string (the part between `ESC [` and `m`)
/// to a style.
pub(super) fn apply_sgr_sequence(style: Style, params: &str) -> Style {
    let parsed: Vec<u16> = params
        .split(';')
        .map(|p| p.parse::<u16>().unwrap_or(0))
        .collect();
    apply_sgr_params(style, &parsed)
}

/// Applies numeric SGR parameters to a style.
///
/// Also used by the LS_COLORS parser, which stores bare SGR parameter
/// lists per file suffix.
pub fn apply_sgr_params(style: Style, params: &[u16]) -> Style {
    let mut style = style;
    let mut i = 0usize;
    if params.is_empty() {
        return Style::default();
    }
    while i < params.len() {
        match params[i] {
            0 => style = Style::default(),
            1 => style.bold = true,
            2 => {} // faint: recognized, rendered as normal weight
            3 => style.italic = true,
            4 => style.underline = true,
            7 => std::mem::swap(&mut style.fg, &mut style.bg),
            22 => style.bold = false,
            23 => style.italic = false,
            24 => style.underline = false,
            27 => std::mem::swap(&mut style.fg, &mut style.bg),
            30..=37 => style.fg = ColorSpec::Indexed((params[i] - 30) as u8),
            39 => style.fg = ColorSpec::Default,
            40..=47 => style.bg = ColorSpec::Indexed((params[i] - 40) as u8),
            49 => style.bg = ColorSpec::Default,
            90..=97 => style.fg = ColorSpec::Indexed((params[i] - 90 + 8) as u8),
            100..=107 => style.bg = ColorSpec::Indexed((params[i] - 100 + 8) as u8),
            38 | 48 => {
                let target_fg = params[i] == 38;
                let color = match params.get(i + 1).copied() {
                    Some(5) => {
                        let c = params.get(i + 2).copied().unwrap_or(0);
                        i += 2;
                        Some(ColorSpec::Indexed(c as u8))
                    }
                    Some(2) => {
                        let r = params.get(i + 2).copied().unwrap_or(0) as u8;
                        let g = params.get(i + 3).copied().unwrap_or(0) as u8;
                        let b = params.get(i + 4).copied().unwrap_or(0) as u8;
                        i += 4;
                        Some(ColorSpec::Rgb(r, g, b))
                    }
                    _ => None,
                };
                if let Some(color) = color {
                    if target_fg {
                        style.fg = color;
                    } else {
                        style.bg = color;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    style
}
