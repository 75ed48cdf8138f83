//! Path coloring from LS_COLORS.
//!
//! Parses the `key=sgr-params` list and styles paths the way `ls` would:
//! directory prefix with the `di` style, basename with the longest
//! matching `*.suffix` rule. A small built-in palette applies when the
//! variable is unset.

use lookout_core::textstyle::{Style, StyledText, apply_sgr_params};

/// Applied to the directory part of every path when no `di` rule exists.
const FALLBACK: &str = "di=01;34:*.py=33:*.rs=33:*.c=33:*.h=33:*.sh=32:\
*.pl=33:*.html=35:*.md=36:*.json=35:*.yaml=35:*.yml=35:*.toml=35:\
*.zip=01;31:*.tar.gz=01;31:*.tgz=01;31:*.tar.bz2=01;31:*.so=01;32:*.a=01;32";

/// Parsed palette.
#[derive(Debug, Clone, Default)]
pub struct PathPalette {
    dir: Style,
    suffixes: Vec<(String, Style)>,
}

impl PathPalette {
    /// Parses an LS_COLORS value, falling back to the built-in palette
    /// when unset.
    pub fn from_env(ls_colors: Option<&str>) -> Self {
        let mut palette = Self::parse(FALLBACK);
        if let Some(value) = ls_colors {
            let user = Self::parse(value);
            if !user.suffixes.is_empty() || user.dir != Style::default() {
                palette = user;
            }
        }
        palette
    }

    fn parse(value: &str) -> Self {
        let mut out = Self::default();
        for rule in value.split(':') {
            let Some((key, params)) = rule.split_once('=') else {
                continue;
            };
            let params: Vec<u16> = params
                .split(';')
                .filter_map(|p| p.parse::<u16>().ok())
                .collect();
            if params.is_empty() {
                continue;
            }
            let style = apply_sgr_params(Style::default(), &params);
            if key == "di" {
                out.dir = style;
            } else if let Some(suffix) = key.strip_prefix('*') {
                out.suffixes.push((suffix.to_string(), style));
            }
        }
        // Longest suffix wins.
        out.suffixes
            .sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));
        out
    }

    fn basename_style(&self, name: &str) -> Style {
        self.suffixes
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix.as_str()))
            .map(|(_, style)| *style)
            .unwrap_or_default()
    }

    /// Styles one codebase-relative path.
    pub fn style_path(&self, rel: &str) -> StyledText {
        match rel.rsplit_once('/') {
            Some((dir, base)) => {
                StyledText::styled(format!("{dir}/"), self.dir)
                    .concat(&StyledText::styled(base, self.basename_style(base)))
            }
            None => StyledText::styled(rel, self.basename_style(rel)),
        }
    }
}
