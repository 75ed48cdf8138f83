//! Immutable styled text.
//!
//! A [`StyledText`] is a sequence of (text, style) runs. Report bodies are
//! built from raw tool output (ANSI escapes parsed into styles, tabs
//! expanded, control characters normalized) and everything downstream of
//! that treats the value as immutable: every operation returns a new value.
//!
//! Widths are measured in terminal display cells, so CJK and emoji count
//! as two columns.

mod sgr;

pub use sgr::apply_sgr_params;

use serde::{Deserialize, Serialize};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Replacement for control characters in tool output.
const CONTROL_REPLACEMENT: char = '·';

/// Tab stops every 8 columns.
const TAB_STOP: usize = 8;

/// A terminal color: 24-bit RGB, a palette index, or the terminal default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorSpec {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Character style: colors plus the attributes the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Style {
    pub fg: ColorSpec,
    pub bg: ColorSpec,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Style {
    pub fn fg(color: ColorSpec) -> Self {
        Self {
            fg: color,
            ..Self::default()
        }
    }

    pub fn with_bg(mut self, color: ColorSpec) -> Self {
        self.bg = color;
        self
    }

    pub fn with_bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn with_underline(mut self) -> Self {
        self.underline = true;
        self
    }
}

/// One run of identically styled text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub style: Style,
}

/// An immutable sequence of styled runs.
///
/// Invariant: no span is empty, and adjacent spans never share a style
/// (they are merged on construction).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyledText {
    spans: Vec<Span>,
}

impl StyledText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unstyled text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::styled(text, Style::default())
    }

    /// A single run with one style.
    pub fn styled(text: impl Into<String>, style: Style) -> Self {
        let mut out = Self::new();
        out.push(&text.into(), style);
        out
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Display width in terminal cells.
    pub fn width(&self) -> usize {
        self.spans.iter().map(|s| s.text.width()).sum()
    }

    /// Number of codepoints.
    pub fn char_count(&self) -> usize {
        self.spans.iter().map(|s| s.text.chars().count()).sum()
    }

    /// The text with styles stripped.
    pub fn to_plain(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    fn push(&mut self, text: &str, style: Style) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.spans.last_mut() {
            if last.style == style {
                last.text.push_str(text);
                return;
            }
        }
        self.spans.push(Span {
            text: text.to_string(),
            style,
        });
    }

    fn push_char(&mut self, ch: char, style: Style) {
        let mut buf = [0u8; 4];
        self.push(ch.encode_utf8(&mut buf), style);
    }

    /// Concatenation, producing a new value.
    pub fn concat(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for span in &other.spans {
            out.push(&span.text, span.style);
        }
        out
    }

    /// The codepoint range `start..end`, clamped to the text length.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let mut out = Self::new();
        let mut index = 0usize;
        for span in &self.spans {
            for ch in span.text.chars() {
                if index >= start && index < end {
                    out.push_char(ch, span.style);
                }
                index += 1;
            }
        }
        out
    }

    /// Truncates to at most `width` display cells, appending an ellipsis
    /// when anything was cut. Idempotent: truncating an already fitting
    /// value returns it unchanged.
    pub fn truncate(&self, width: usize) -> Self {
        if self.width() <= width {
            return self.clone();
        }
        if width == 0 {
            return Self::new();
        }
        let mut out = Self::new();
        let mut used = 0usize;
        let mut last_style = Style::default();
        'outer: for span in &self.spans {
            for ch in span.text.chars() {
                let w = ch.width().unwrap_or(0);
                // Reserve one cell for the ellipsis.
                if used + w + 1 > width {
                    break 'outer;
                }
                out.push_char(ch, span.style);
                used += w;
                last_style = span.style;
            }
        }
        out.push("…", last_style);
        out
    }

    /// Pads on the right with unstyled spaces up to `width` cells.
    pub fn pad_right(&self, width: usize) -> Self {
        let current = self.width();
        if current >= width {
            return self.clone();
        }
        let mut out = self.clone();
        out.push(&" ".repeat(width - current), Style::default());
        out
    }

    /// Pads on the left with unstyled spaces up to `width` cells.
    pub fn pad_left(&self, width: usize) -> Self {
        let current = self.width();
        if current >= width {
            return self.clone();
        }
        let mut out = Self::plain(" ".repeat(width - current));
        for span in &self.spans {
            out.push(&span.text, span.style);
        }
        out
    }

    /// Splits at line feeds. CRLF collapses to a single break and a
    /// trailing carriage return never survives into a line.
    pub fn lines(&self) -> Vec<Self> {
        let mut lines = vec![Self::new()];
        for span in &self.spans {
            for part in split_keep_breaks(&span.text) {
                match part {
                    LinePart::Text(text) => {
                        if let Some(current) = lines.last_mut() {
                            current.push(text, span.style);
                        }
                    }
                    LinePart::Break => lines.push(Self::new()),
                }
            }
        }
        lines
    }

    /// Builds styled text from raw tool output.
    ///
    /// Invalid UTF-8 is replaced, SGR escape sequences become style
    /// changes, tabs expand to the next multiple of 8, and remaining
    /// control characters are rendered as `·`.
    pub fn from_tool_output(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut out = Self::new();
        let mut style = Style::default();
        let mut column = 0usize;
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0usize;
        while i < chars.len() {
            let ch = chars[i];
            match ch {
                '\x1b' => {
                    i += 1;
                    if chars.get(i) == Some(&'[') {
                        i += 1;
                        let start = i;
                        while i < chars.len() && !('\x40'..='\x7e').contains(&chars[i]) {
                            i += 1;
                        }
                        if chars.get(i) == Some(&'m') {
                            let params: String = chars[start..i].iter().collect();
                            style = sgr::apply_sgr_sequence(style, &params);
                        }
                        // Non-SGR CSI sequences are consumed silently.
                        i += 1;
                    } else {
                        // Other escapes: drop the escape and its selector.
                        i += 1;
                    }
                }
                '\r' => {
                    // CRLF collapses; a stray CR is dropped.
                    i += 1;
                }
                '\n' => {
                    out.push("\n", style);
                    column = 0;
                    i += 1;
                }
                '\t' => {
                    let pad = TAB_STOP - (column % TAB_STOP);
                    out.push(&" ".repeat(pad), style);
                    column += pad;
                    i += 1;
                }
                c if c.is_control() => {
                    out.push_char(CONTROL_REPLACEMENT, style);
                    column += 1;
                    i += 1;
                }
                c => {
                    out.push_char(c, style);
                    column += c.width().unwrap_or(0);
                    i += 1;
                }
            }
        }
        out
    }
}

enum LinePart<'a> {
    Text(&'a str),
    Break,
}

fn split_keep_breaks(text: &str) -> Vec<LinePart<'_>> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find('\n') {
        let line = rest[..pos].strip_suffix('\r').unwrap_or(&rest[..pos]);
        if !line.is_empty() {
            parts.push(LinePart::Text(line));
        }
        parts.push(LinePart::Break);
        rest = &rest[pos + 1..];
    }
    if !rest.is_empty() {
        parts.push(LinePart::Text(rest));
    }
    parts
}
