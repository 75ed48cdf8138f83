//! Tool descriptors and the registry.
//!
//! Every analyzer is a static [`ToolDescriptor`]: an invocation template,
//! a timeout, and an exit classifier. The registry is built once at
//! startup by probing `PATH`; tools whose executable is missing are
//! elided with a warning instead of producing per-file errors.

mod classify;

pub use classify::{FileClass, classify_file, split_ext};

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::report::Status;

/// How a tool is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// External command; `{path}` in the argument list is replaced with
    /// the absolute file path.
    Exec {
        program: &'static str,
        args: &'static [&'static str],
    },
    /// Built-in: the file content, normalized for display.
    Contents,
    /// Built-in: stat details, digests, and `file` identification.
    Metadata,
}

/// How an exit is turned into a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    /// Exit 0 is Ok, anything else is Problem.
    ExitCode,
    /// Any completed run is Ok; the output is informational.
    Always,
    /// Explicit exit-code table with a default for unlisted codes.
    ExitTable {
        table: &'static [(i32, Status)],
        default: Status,
    },
    /// Problem iff the pattern matches the combined output.
    OutputRegex { pattern: &'static str },
}

/// Per-tool applicability beyond the extension table. A declined file
/// gets NotApplicable instead of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// Every file the extension table routed here.
    Any,
    /// Only files with this suffix (test runners).
    Suffix(&'static str),
    /// Only files with a sibling `<stem>_test.py` (coverage).
    SiblingTest,
}

/// Static description of one analyzer.
#[derive(Debug)]
pub struct ToolDescriptor {
    pub name: &'static str,
    /// Accent color for the tool name in the UI.
    pub color: (u8, u8, u8),
    pub kind: ToolKind,
    pub timeout_s: u64,
    /// Folded into snapshot keys so cached results are invalidated when
    /// a tool's behavior changes.
    pub version_tag: &'static str,
    pub classify: Classifier,
    pub applies: Applicability,
}

impl ToolDescriptor {
    /// The executable this tool needs on PATH, if any.
    pub fn program(&self) -> Option<&'static str> {
        match self.kind {
            ToolKind::Exec { program, .. } => Some(program),
            ToolKind::Contents | ToolKind::Metadata => None,
        }
    }

    /// The argv with `{path}` substituted.
    pub fn argv(&self, abs_path: &Path) -> Option<Vec<String>> {
        let ToolKind::Exec { program, args } = self.kind else {
            return None;
        };
        let mut argv = vec![program.to_string()];
        for arg in args {
            if *arg == "{path}" {
                argv.push(abs_path.to_string_lossy().into_owned());
            } else {
                argv.push((*arg).to_string());
            }
        }
        Some(argv)
    }
}

const WHITE: (u8, u8, u8) = (0xe0, 0xe0, 0xe0);
const BLUE: (u8, u8, u8) = (0x61, 0xaf, 0xef);
const YELLOW: (u8, u8, u8) = (0xe5, 0xc0, 0x7b);
const GREEN: (u8, u8, u8) = (0x98, 0xc3, 0x79);
const ORANGE: (u8, u8, u8) = (0xd1, 0x9a, 0x66);
const PURPLE: (u8, u8, u8) = (0xc6, 0x78, 0xdd);

macro_rules! exec {
    ($program:literal, $($arg:literal),+) => {
        ToolKind::Exec { program: $program, args: &[$($arg),+] }
    };
}

pub static CONTENTS: ToolDescriptor = ToolDescriptor {
    name: "contents",
    color: WHITE,
    kind: ToolKind::Contents,
    timeout_s: 20,
    version_tag: "1",
    classify: Classifier::Always,
    applies: Applicability::Any,
};

pub static METADATA: ToolDescriptor = ToolDescriptor {
    name: "metadata",
    color: WHITE,
    kind: ToolKind::Metadata,
    timeout_s: 20,
    version_tag: "1",
    classify: Classifier::Always,
    applies: Applicability::Any,
};

pub static GIT_BLAME: ToolDescriptor = ToolDescriptor {
    name: "git_blame",
    color: ORANGE,
    kind: exec!("git", "blame", "--date=short", "--", "{path}"),
    timeout_s: 20,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::NotApplicable,
    },
    applies: Applicability::Any,
};

pub static GIT_LOG: ToolDescriptor = ToolDescriptor {
    name: "git_log",
    color: ORANGE,
    kind: exec!("git", "log", "--oneline", "--follow", "--", "{path}"),
    timeout_s: 20,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::NotApplicable,
    },
    applies: Applicability::Any,
};

pub static PYTHON_SYNTAX: ToolDescriptor = ToolDescriptor {
    name: "python_syntax",
    color: BLUE,
    kind: exec!("python3", "-m", "py_compile", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static PYTHON_UNITTESTS: ToolDescriptor = ToolDescriptor {
    name: "python_unittests",
    color: BLUE,
    kind: exec!("python3", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Suffix("_test.py"),
};

/// Driver handed to `python3 -c`: runs the sibling test file under
/// coverage with a scratch data file, then prints the line report for
/// the source file. The sibling's existence is checked before dispatch,
/// so the driver can assume it is there.
const COVERAGE_DRIVER: &str = "\
import os, subprocess, sys, tempfile
src = sys.argv[1]
test = src[:-len('.py')] + '_test.py'
with tempfile.TemporaryDirectory() as scratch:
    env = dict(os.environ, COVERAGE_FILE=os.path.join(scratch, 'cov'))
    run = subprocess.run([sys.executable, '-m', 'coverage', 'run', test],
                         env=env, capture_output=True, text=True)
    report = subprocess.run([sys.executable, '-m', 'coverage', 'report',
                             '--show-missing', '--include', src], env=env)
sys.stderr.write(run.stderr)
sys.exit(report.returncode or run.returncode)
";

pub static PYTHON_COVERAGE: ToolDescriptor = ToolDescriptor {
    name: "python_coverage",
    color: BLUE,
    kind: ToolKind::Exec {
        program: "python3",
        args: &["-c", COVERAGE_DRIVER, "{path}"],
    },
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::SiblingTest,
};

pub static PYCODESTYLE: ToolDescriptor = ToolDescriptor {
    name: "pycodestyle",
    color: BLUE,
    kind: exec!("python3", "-m", "pycodestyle", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static PYFLAKES: ToolDescriptor = ToolDescriptor {
    name: "pyflakes",
    color: BLUE,
    kind: exec!("python3", "-m", "pyflakes", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static PYLINT: ToolDescriptor = ToolDescriptor {
    name: "pylint",
    color: BLUE,
    kind: exec!("python3", "-m", "pylint", "--errors-only", "{path}"),
    timeout_s: 120,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static PERL_SYNTAX: ToolDescriptor = ToolDescriptor {
    name: "perl_syntax",
    color: PURPLE,
    kind: exec!("perl", "-c", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static PERLDOC: ToolDescriptor = ToolDescriptor {
    name: "perldoc",
    color: PURPLE,
    kind: exec!("perldoc", "-T", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::NotApplicable,
    },
    applies: Applicability::Any,
};

pub static PERLTIDY: ToolDescriptor = ToolDescriptor {
    name: "perltidy",
    color: PURPLE,
    kind: exec!("perltidy", "-st", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::Always,
    applies: Applicability::Any,
};

pub static GCC_SYNTAX: ToolDescriptor = ToolDescriptor {
    name: "gcc_syntax",
    color: GREEN,
    kind: exec!("gcc", "-fsyntax-only", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static GXX_SYNTAX: ToolDescriptor = ToolDescriptor {
    name: "gxx_syntax",
    color: GREEN,
    kind: exec!("g++", "-fsyntax-only", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static RUSTFMT_CHECK: ToolDescriptor = ToolDescriptor {
    name: "rustfmt_check",
    color: ORANGE,
    kind: exec!("rustfmt", "--check", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static BASH_SYNTAX: ToolDescriptor = ToolDescriptor {
    name: "bash_syntax",
    color: GREEN,
    kind: exec!("bash", "-n", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static SHELLCHECK: ToolDescriptor = ToolDescriptor {
    name: "shellcheck",
    color: GREEN,
    kind: exec!("shellcheck", "{path}"),
    timeout_s: 60,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static HTML_TIDY: ToolDescriptor = ToolDescriptor {
    name: "html_tidy",
    color: YELLOW,
    kind: exec!("tidy", "-errors", "-quiet", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::OutputRegex {
        pattern: r"(?im)^line \d+.*error:",
    },
    applies: Applicability::Any,
};

pub static JQ_SYNTAX: ToolDescriptor = ToolDescriptor {
    name: "jq_syntax",
    color: YELLOW,
    kind: exec!("jq", "empty", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static TAPLO_CHECK: ToolDescriptor = ToolDescriptor {
    name: "taplo_check",
    color: YELLOW,
    kind: exec!("taplo", "check", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static YAMLLINT: ToolDescriptor = ToolDescriptor {
    name: "yamllint",
    color: YELLOW,
    kind: exec!("yamllint", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static MARKDOWN_LINT: ToolDescriptor = ToolDescriptor {
    name: "markdown_lint",
    color: YELLOW,
    kind: exec!("mdl", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitCode,
    applies: Applicability::Any,
};

pub static CSV_HEAD: ToolDescriptor = ToolDescriptor {
    name: "csv_head",
    color: WHITE,
    kind: exec!("head", "--lines=20", "{path}"),
    timeout_s: 20,
    version_tag: "1",
    classify: Classifier::Always,
    applies: Applicability::Any,
};

pub static UNZIP_LIST: ToolDescriptor = ToolDescriptor {
    name: "unzip_list",
    color: WHITE,
    kind: exec!("unzip", "-l", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::Problem,
    },
    applies: Applicability::Any,
};

pub static TAR_GZ_LIST: ToolDescriptor = ToolDescriptor {
    name: "tar_gz_list",
    color: WHITE,
    kind: exec!("tar", "ztvf", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::Problem,
    },
    applies: Applicability::Any,
};

pub static TAR_BZ2_LIST: ToolDescriptor = ToolDescriptor {
    name: "tar_bz2_list",
    color: WHITE,
    kind: exec!("tar", "jtvf", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::Problem,
    },
    applies: Applicability::Any,
};

pub static NM_SYMBOLS: ToolDescriptor = ToolDescriptor {
    name: "nm_symbols",
    color: WHITE,
    kind: exec!("nm", "--demangle", "{path}"),
    timeout_s: 30,
    version_tag: "1",
    classify: Classifier::ExitTable {
        table: &[(0, Status::Ok)],
        default: Status::NotApplicable,
    },
    applies: Applicability::Any,
};

/// Tools that apply to every file.
pub static GENERIC_TOOLS: &[&ToolDescriptor] = &[&CONTENTS, &METADATA, &GIT_BLAME, &GIT_LOG];

/// Extension to tool-list table. Compound extensions are matched first
/// by [`split_ext`].
pub static EXTENSION_TABLE: &[(&[&str], &[&ToolDescriptor])] = &[
    (
        &["py"],
        &[
            &PYTHON_SYNTAX,
            &PYTHON_UNITTESTS,
            &PYTHON_COVERAGE,
            &PYCODESTYLE,
            &PYFLAKES,
            &PYLINT,
        ],
    ),
    (&["pl", "pm"], &[&PERL_SYNTAX, &PERLDOC, &PERLTIDY]),
    (&["c", "h"], &[&GCC_SYNTAX]),
    (&["cpp", "cc", "cxx", "hpp"], &[&GXX_SYNTAX]),
    (&["rs"], &[&RUSTFMT_CHECK]),
    (&["sh", "bash"], &[&BASH_SYNTAX, &SHELLCHECK]),
    (&["html", "htm"], &[&HTML_TIDY]),
    (&["json"], &[&JQ_SYNTAX]),
    (&["toml"], &[&TAPLO_CHECK]),
    (&["yaml", "yml"], &[&YAMLLINT]),
    (&["md"], &[&MARKDOWN_LINT]),
    (&["csv"], &[&CSV_HEAD]),
    (&["zip"], &[&UNZIP_LIST]),
    (&["tar.gz", "tgz"], &[&TAR_GZ_LIST]),
    (&["tar.bz2"], &[&TAR_BZ2_LIST]),
    (&["o", "so", "a"], &[&NM_SYMBOLS]),
];

/// Every descriptor, deduplicated by name.
pub fn all_tools() -> Vec<&'static ToolDescriptor> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tool in GENERIC_TOOLS
        .iter()
        .chain(EXTENSION_TABLE.iter().flat_map(|(_, tools)| tools.iter()))
    {
        if seen.insert(tool.name) {
            out.push(*tool);
        }
    }
    out
}

/// Looks a descriptor up by name, independent of availability. Workers
/// use this: the parent only enqueues jobs for available tools.
pub fn tool_by_name(name: &str) -> Option<&'static ToolDescriptor> {
    all_tools().into_iter().find(|tool| tool.name == name)
}

/// The startup-probed set of usable tools.
#[derive(Debug)]
pub struct ToolRegistry {
    available: Vec<&'static ToolDescriptor>,
    missing: Vec<(&'static str, &'static str)>,
}

impl ToolRegistry {
    /// Probes `PATH` from the environment.
    pub fn probe() -> Self {
        Self::probe_with_path(std::env::var("PATH").ok().as_deref())
    }

    /// Probes an explicit PATH value (tests pass a controlled one).
    pub fn probe_with_path(path_var: Option<&str>) -> Self {
        let mut available = Vec::new();
        let mut missing = Vec::new();
        for tool in all_tools() {
            match tool.program() {
                None => available.push(tool),
                Some(program) => {
                    if program_on_path(program, path_var) {
                        available.push(tool);
                    } else {
                        warn!(tool = tool.name, program, "executable missing, tool elided");
                        missing.push((tool.name, program));
                    }
                }
            }
        }
        Self { available, missing }
    }

    pub fn available(&self) -> &[&'static ToolDescriptor] {
        &self.available
    }

    /// Tools elided at startup, as (tool, program) pairs.
    pub fn missing(&self) -> &[(&'static str, &'static str)] {
        &self.missing
    }

    fn is_available(&self, tool: &ToolDescriptor) -> bool {
        self.available.iter().any(|t| t.name == tool.name)
    }

    /// The ordered tool list for one file: generic tools first, then the
    /// tools for its classification.
    pub fn tools_for(&self, rel: &str, abs: &Path) -> Vec<&'static ToolDescriptor> {
        let class = classify_file(rel, abs);
        let mut out: Vec<&'static ToolDescriptor> = GENERIC_TOOLS
            .iter()
            .copied()
            .filter(|t| self.is_available(t))
            .collect();
        if let Some(ext) = class.ext {
            for (exts, tools) in EXTENSION_TABLE {
                if exts.contains(&ext.as_str()) {
                    out.extend(tools.iter().copied().filter(|t| self.is_available(t)));
                }
            }
        }
        out
    }

    /// Human-readable tool and extension matrix for `--info`.
    pub fn info_matrix(&self) -> String {
        let mut out = String::new();
        out.push_str("Tools for every file:\n");
        for tool in GENERIC_TOOLS {
            out.push_str(&format!("  {}{}\n", tool.name, self.elided_note(tool)));
        }
        out.push_str("\nTools by extension:\n");
        let mut by_ext: BTreeMap<&str, Vec<&ToolDescriptor>> = BTreeMap::new();
        for (exts, tools) in EXTENSION_TABLE {
            for ext in *exts {
                by_ext.entry(ext).or_default().extend(tools.iter().copied());
            }
        }
        for (ext, tools) in by_ext {
            let list: Vec<String> = tools
                .iter()
                .map(|t| format!("{}{}", t.name, self.elided_note(t)))
                .collect();
            out.push_str(&format!("  .{ext}: {}\n", list.join(", ")));
        }
        out
    }

    fn elided_note(&self, tool: &ToolDescriptor) -> String {
        if self.is_available(tool) {
            String::new()
        } else {
            let program = tool.program().unwrap_or("");
            format!(" (missing: {program})")
        }
    }
}

fn program_on_path(program: &str, path_var: Option<&str>) -> bool {
    let Some(path_var) = path_var else {
        return false;
    };
    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(program);
        if let Ok(meta) = std::fs::metadata(&candidate) {
            use std::os::unix::fs::PermissionsExt;
            if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_substitutes_the_path_placeholder() {
        let argv = PYTHON_SYNTAX.argv(Path::new("/tmp/x.py")).unwrap();
        assert_eq!(argv, vec!["python3", "-m", "py_compile", "/tmp/x.py"]);
        assert!(CONTENTS.argv(Path::new("/tmp/x.py")).is_none());
    }

    #[test]
    fn all_tools_are_uniquely_named() {
        let tools = all_tools();
        let names: std::collections::HashSet<&str> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn empty_path_elides_every_external_tool() {
        let registry = ToolRegistry::probe_with_path(Some(""));
        let names: Vec<&str> = registry.available().iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["contents", "metadata"]);
        assert!(!registry.missing().is_empty());
    }

    #[test]
    fn probe_finds_executables_in_a_controlled_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("python3");
        std::fs::write(&fake, "#!/bin/sh\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path_var = dir.path().to_string_lossy().into_owned();
        let registry = ToolRegistry::probe_with_path(Some(&path_var));
        let names: Vec<&str> = registry.available().iter().map(|t| t.name).collect();
        assert!(names.contains(&"python_syntax"));
        assert!(!names.contains(&"perl_syntax"));
    }

    #[test]
    fn tools_for_a_python_file_include_syntax_and_generics() {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().join("hello.py");
        std::fs::write(&abs, "print(\"hi\")\n").unwrap();

        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        for program in ["python3", "git"] {
            let path = bin.join(program);
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let path_var = bin.to_string_lossy().into_owned();
        let registry = ToolRegistry::probe_with_path(Some(&path_var));

        let names: Vec<&str> = registry
            .tools_for("hello.py", &abs)
            .iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "contents",
                "metadata",
                "git_blame",
                "git_log",
                "python_syntax",
                "python_unittests",
                "python_coverage",
                "pycodestyle",
                "pyflakes",
                "pylint",
            ]
        );
    }

    #[test]
    fn info_matrix_mentions_missing_programs() {
        let registry = ToolRegistry::probe_with_path(Some(""));
        let matrix = registry.info_matrix();
        assert!(matrix.contains("contents"));
        assert!(matrix.contains(".py:"));
        assert!(matrix.contains("(missing: python3)"));
    }
}
