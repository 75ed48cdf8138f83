//! File classification: extension table, shebang parsing, and a content
//! sniffer fallback for anything still ambiguous.

use std::io::Read;
use std::path::Path;
use std::process::Command;

/// Classification result. `ext` is the effective extension used to look
/// tools up, which may come from the file name, a shebang, or the
/// sniffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClass {
    pub ext: Option<String>,
}

/// Splits a relative path into stem and extension, keeping compound
/// archive extensions whole.
pub fn split_ext(rel: &str) -> (&str, Option<&str>) {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    for compound in [".tar.gz", ".tar.bz2"] {
        if let Some(stem) = name.strip_suffix(compound) {
            if !stem.is_empty() {
                return (stem, Some(&compound[1..]));
            }
        }
    }
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => {
            (&name[..pos], Some(&name[pos + 1..]))
        }
        _ => (name, None),
    }
}

/// Classifies one file. Extension wins; extensionless files fall back to
/// the shebang line, then to `file --brief --mime-type`.
pub fn classify_file(rel: &str, abs: &Path) -> FileClass {
    let (_, ext) = split_ext(rel);
    if let Some(ext) = ext {
        return FileClass {
            ext: Some(ext.to_ascii_lowercase()),
        };
    }
    if let Some(ext) = ext_from_shebang(abs) {
        return FileClass {
            ext: Some(ext.to_string()),
        };
    }
    FileClass {
        ext: ext_from_sniffer(abs).map(str::to_string),
    }
}

/// Reads the first line and maps a `#!` interpreter to an extension.
fn ext_from_shebang(abs: &Path) -> Option<&'static str> {
    let mut head = [0u8; 128];
    let mut file = std::fs::File::open(abs).ok()?;
    let n = file.read(&mut head).ok()?;
    let head = &head[..n];
    if !head.starts_with(b"#!") {
        return None;
    }
    let line = head.split(|b| *b == b'\n').next()?;
    let line = String::from_utf8_lossy(line);
    interpreter_ext(&line)
}

fn interpreter_ext(shebang: &str) -> Option<&'static str> {
    // The interpreter is the last path component of the first word, or
    // the word after env.
    let mut words = shebang.trim_start_matches("#!").split_whitespace();
    let mut interp = words.next()?.rsplit('/').next()?;
    if interp == "env" {
        interp = words.next()?;
    }
    let interp = interp.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    match interp {
        "python" => Some("py"),
        "sh" | "bash" | "dash" | "zsh" | "ksh" => Some("sh"),
        "perl" => Some("pl"),
        _ => None,
    }
}

/// Invokes the `file` utility as the classifier of last resort.
fn ext_from_sniffer(abs: &Path) -> Option<&'static str> {
    let output = Command::new("file")
        .args(["--brief", "--mime-type"])
        .arg(abs)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let mime = String::from_utf8_lossy(&output.stdout);
    match mime.trim() {
        "text/x-python" | "text/x-script.python" => Some("py"),
        "text/x-shellscript" => Some("sh"),
        "text/x-perl" => Some("pl"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn split_ext_handles_simple_and_compound_extensions() {
        assert_eq!(split_ext("a/b/main.py"), ("main", Some("py")));
        assert_eq!(split_ext("archive.tar.gz"), ("archive", Some("tar.gz")));
        assert_eq!(split_ext("archive.tar.bz2"), ("archive", Some("tar.bz2")));
        assert_eq!(split_ext("Makefile"), ("Makefile", None));
        // Dotfiles have no extension.
        assert_eq!(split_ext(".bashrc"), (".bashrc", None));
        // A trailing dot is not an extension.
        assert_eq!(split_ext("weird."), ("weird.", None));
    }

    #[test]
    fn extension_beats_shebang() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.py");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        assert_eq!(
            classify_file("script.py", &path).ext.as_deref(),
            Some("py")
        );
    }

    #[test]
    fn extensionless_files_use_the_shebang() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runme");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/usr/bin/env python3").unwrap();
        writeln!(file, "print('hi')").unwrap();
        assert_eq!(classify_file("runme", &path).ext.as_deref(), Some("py"));
    }

    #[test]
    fn shebang_interpreters_map_to_extensions() {
        assert_eq!(interpreter_ext("#!/bin/bash"), Some("sh"));
        assert_eq!(interpreter_ext("#!/usr/bin/perl -w"), Some("pl"));
        assert_eq!(interpreter_ext("#!/usr/bin/env python3.12"), Some("py"));
        assert_eq!(interpreter_ext("#!/usr/bin/node"), None);
    }

    #[test]
    fn uppercase_extensions_are_folded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("README.MD");
        std::fs::write(&path, "hi\n").unwrap();
        assert_eq!(classify_file("README.MD", &path).ext.as_deref(), Some("md"));
    }
}
