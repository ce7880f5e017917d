//! Static linter registry.
//!
//! The single source of truth for which linters exist: executable
//! names, base argument vectors, accepted file types, timeouts, output
//! parsers, and exit-code semantics. Adding a linter means adding one
//! descriptor here and, if its output shape is new, one parser variant.

use crate::services::parsers::ParserId;
use crate::types::OutputFormat;
use std::path::Path;

/// Everything the runner needs to know about one supported linter.
#[derive(Debug, Clone)]
pub struct LinterDescriptor {
    pub name: &'static str,
    pub executable: &'static str,
    /// Always-present arguments, typically the format selector.
    pub base_args: &'static [&'static str],
    /// File extensions the tool accepts (lowercase).
    pub extensions: &'static [&'static str],
    /// Extensionless filenames the tool accepts (lowercase), e.g. `dockerfile`.
    pub filenames: &'static [&'static str],
    /// Default execution timeout; request timeouts are clamped to this.
    pub timeout_ms: u64,
    pub parser: ParserId,
    /// Whether `--fix` may be appended when the client asks for fix mode.
    pub accepts_fix: bool,
    /// Whether `--config <path>` may be appended.
    pub accepts_config_file: bool,
    /// Exit codes at or above this value mean the tool itself failed.
    /// Codes below it are a completed run, possibly with findings.
    pub failure_exit_threshold: i32,
    pub formats: &'static [OutputFormat],
}

impl LinterDescriptor {
    /// Whether this linter will read the given file.
    #[must_use]
    pub fn supports_file(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.extensions.contains(&ext.to_ascii_lowercase().as_str()) {
                return true;
            }
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.filenames.contains(&n.to_ascii_lowercase().as_str()))
    }

    /// Whether this linter can render the requested output format.
    #[must_use]
    pub fn supports_format(&self, format: OutputFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Interprets an exit code: completed run vs. tool failure.
    #[must_use]
    pub fn exit_code_is_success(&self, code: i32) -> bool {
        code >= 0 && code < self.failure_exit_threshold
    }
}

const JSON_TEXT: &[OutputFormat] = &[OutputFormat::Json, OutputFormat::Text];
const JSON_TEXT_SARIF: &[OutputFormat] =
    &[OutputFormat::Json, OutputFormat::Text, OutputFormat::Sarif];

/// All registered linters.
pub static LINTERS: &[LinterDescriptor] = &[
    LinterDescriptor {
        name: "eslint",
        executable: "eslint",
        base_args: &["--format", "json"],
        extensions: &["js", "jsx", "mjs", "cjs", "ts", "tsx", "vue"],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::EslintJson,
        accepts_fix: true,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT_SARIF,
    },
    LinterDescriptor {
        name: "prettier",
        executable: "prettier",
        base_args: &["--list-different"],
        extensions: &[
            "js", "jsx", "ts", "tsx", "json", "css", "scss", "md", "yml", "yaml", "html",
        ],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::FileList,
        accepts_fix: false,
        accepts_config_file: false,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "pylint",
        executable: "pylint",
        base_args: &["--output-format", "json"],
        extensions: &["py"],
        filenames: &[],
        timeout_ms: 60_000,
        parser: ParserId::PylintJson,
        accepts_fix: false,
        accepts_config_file: false,
        // pylint's status byte is a findings bitmask below 32
        failure_exit_threshold: 32,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "flake8",
        executable: "flake8",
        base_args: &[],
        extensions: &["py"],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::ColonDelimited,
        accepts_fix: false,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "black",
        executable: "black",
        base_args: &["--check", "--diff"],
        extensions: &["py"],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::DiffStyle,
        accepts_fix: false,
        accepts_config_file: false,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "shellcheck",
        executable: "shellcheck",
        base_args: &["--format", "json"],
        extensions: &["sh", "bash", "ksh", "dash"],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::ShellcheckJson,
        accepts_fix: false,
        accepts_config_file: false,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "hadolint",
        executable: "hadolint",
        base_args: &["--format", "json"],
        extensions: &["dockerfile"],
        filenames: &["dockerfile"],
        timeout_ms: 30_000,
        parser: ParserId::ShellcheckJson,
        accepts_fix: false,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "yamllint",
        executable: "yamllint",
        base_args: &["--format", "parsable"],
        extensions: &["yml", "yaml"],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::ColonDelimited,
        accepts_fix: false,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "markdownlint",
        executable: "markdownlint",
        base_args: &[],
        extensions: &["md", "markdown"],
        filenames: &[],
        timeout_ms: 30_000,
        parser: ParserId::ColonDelimited,
        accepts_fix: true,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "jsonlint",
        executable: "jsonlint",
        base_args: &["--compact"],
        extensions: &["json"],
        filenames: &[],
        timeout_ms: 15_000,
        parser: ParserId::ColonDelimited,
        accepts_fix: false,
        accepts_config_file: false,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
    LinterDescriptor {
        name: "golangci-lint",
        executable: "golangci-lint",
        base_args: &["run", "--out-format", "json"],
        extensions: &["go"],
        filenames: &[],
        timeout_ms: 120_000,
        parser: ParserId::GolangciJson,
        accepts_fix: true,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT_SARIF,
    },
    LinterDescriptor {
        name: "rubocop",
        executable: "rubocop",
        base_args: &["--format", "json"],
        extensions: &["rb", "rake"],
        filenames: &["rakefile", "gemfile"],
        timeout_ms: 60_000,
        parser: ParserId::RubocopJson,
        accepts_fix: true,
        accepts_config_file: true,
        failure_exit_threshold: 2,
        formats: JSON_TEXT,
    },
];

/// Lookup facade over [`LINTERS`].
pub struct LinterRegistry;

impl LinterRegistry {
    /// Finds a descriptor by linter name.
    #[must_use]
    pub fn get(name: &str) -> Option<&'static LinterDescriptor> {
        LINTERS.iter().find(|d| d.name == name)
    }

    /// All registered descriptors.
    #[must_use]
    pub fn all() -> &'static [LinterDescriptor] {
        LINTERS
    }

    /// Registered linter names.
    pub fn names() -> impl Iterator<Item = &'static str> {
        LINTERS.iter().map(|d| d.name)
    }
}
