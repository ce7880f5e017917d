//! Linter output parsers.
//!
//! Each registered linter names one strategy here via its descriptor.
//! Parsers are total functions: empty output, malformed JSON, and
//! multi-document streams all produce a result, never an error. When
//! JSON cannot be recovered the raw text degrades to a single
//! synthetic issue so the client still sees what the tool said.

use crate::types::{LintIssue, Severity};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Strategy tag stored in each linter descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserId {
    /// eslint `--format json`: array of files with `messages`.
    EslintJson,
    /// pylint `--output-format json`: flat array of findings.
    PylintJson,
    /// shellcheck/hadolint JSON: flat array with `level` and `code`.
    ShellcheckJson,
    /// golangci-lint `--out-format json`: object with `Issues`.
    GolangciJson,
    /// rubocop JSON: object with `files[].offenses`.
    RubocopJson,
    /// `file:line[:col][:] message` lines (flake8, yamllint, markdownlint).
    ColonDelimited,
    /// One offending file per line (prettier `--list-different`).
    FileList,
    /// Unified diff on stdout plus `would reformat <file>` notes (black).
    DiffStyle,
}

/// Parser output: normalized issues plus the tool's own structure.
#[derive(Debug, Clone)]
pub struct ParsedOutput {
    pub issues: Vec<LintIssue>,
    pub parsed: Value,
}

/// Converts raw tool output into the normalized issue list.
///
/// Strategies scan whichever stream their tool writes diagnostics to;
/// callers always pass both.
#[must_use]
pub fn parse_output(id: ParserId, stdout: &str, stderr: &str, exit_code: i32) -> ParsedOutput {
    match id {
        ParserId::EslintJson => parse_eslint(stdout, stderr),
        ParserId::PylintJson => parse_pylint(stdout, stderr),
        ParserId::ShellcheckJson => parse_shellcheck(stdout, stderr),
        ParserId::GolangciJson => parse_golangci(stdout, stderr),
        ParserId::RubocopJson => parse_rubocop(stdout, stderr),
        ParserId::ColonDelimited => parse_colon_delimited(stdout, stderr),
        ParserId::FileList => parse_file_list(stdout, exit_code),
        ParserId::DiffStyle => parse_diff_style(stdout, stderr),
    }
}

// ============================================================================
// JSON strategies
// ============================================================================

/// Extracts JSON documents from a raw stream.
///
/// Handles a single document, concatenated documents, and leading noise
/// before the first document. Returns `None` when nothing parses.
fn json_documents(raw: &str) -> Option<Vec<Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let docs: Vec<Value> = serde_json::Deserializer::from_str(trimmed)
        .into_iter::<Value>()
        .filter_map(std::result::Result::ok)
        .collect();
    if !docs.is_empty() {
        return Some(docs);
    }

    // Some tools prefix JSON with warnings; retry from the first brace/bracket
    let start = trimmed.find(['{', '['])?;
    let docs: Vec<Value> = serde_json::Deserializer::from_str(&trimmed[start..])
        .into_iter::<Value>()
        .filter_map(std::result::Result::ok)
        .collect();
    (!docs.is_empty()).then_some(docs)
}

/// Picks the diagnostic stream: stdout when it holds JSON, else stderr.
fn json_from_either(stdout: &str, stderr: &str) -> Option<(Vec<Value>, &'static str)> {
    if let Some(docs) = json_documents(stdout) {
        return Some((docs, "stdout"));
    }
    json_documents(stderr).map(|docs| (docs, "stderr"))
}

/// Fallback when a JSON strategy finds no JSON: one synthetic issue
/// carrying the raw text, or nothing when the tool printed nothing.
fn degrade(stdout: &str, stderr: &str) -> ParsedOutput {
    let raw = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };
    if raw.is_empty() {
        return ParsedOutput {
            issues: Vec::new(),
            parsed: Value::Null,
        };
    }
    ParsedOutput {
        issues: vec![LintIssue {
            file: String::new(),
            line: 0,
            column: 0,
            rule: None,
            severity: Severity::Error,
            message: format!("unparseable linter output: {}", truncate(raw, 2000)),
            source: None,
        }],
        parsed: Value::String(raw.to_string()),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn get_str(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn get_u32(v: &Value, key: &str) -> u32 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}

fn parse_eslint(stdout: &str, stderr: &str) -> ParsedOutput {
    let Some((docs, _)) = json_from_either(stdout, stderr) else {
        return degrade(stdout, stderr);
    };

    let mut issues = Vec::new();
    for doc in &docs {
        let Some(files) = doc.as_array() else { continue };
        for file in files {
            let path = get_str(file, "filePath");
            let Some(messages) = file.get("messages").and_then(Value::as_array) else {
                continue;
            };
            for msg in messages {
                let severity = match msg.get("severity").and_then(Value::as_i64) {
                    Some(2) => Severity::Error,
                    Some(1) => Severity::Warning,
                    _ => Severity::Info,
                };
                issues.push(LintIssue {
                    file: path.clone(),
                    line: get_u32(msg, "line"),
                    column: get_u32(msg, "column"),
                    rule: msg
                        .get("ruleId")
                        .and_then(Value::as_str)
                        .map(String::from),
                    severity,
                    message: get_str(msg, "message"),
                    source: msg
                        .get("source")
                        .and_then(Value::as_str)
                        .map(String::from),
                });
            }
        }
    }

    ParsedOutput {
        issues,
        parsed: single_or_array(docs),
    }
}

fn parse_pylint(stdout: &str, stderr: &str) -> ParsedOutput {
    let Some((docs, _)) = json_from_either(stdout, stderr) else {
        return degrade(stdout, stderr);
    };

    let mut issues = Vec::new();
    for doc in &docs {
        let Some(findings) = doc.as_array() else {
            continue;
        };
        for f in findings {
            issues.push(LintIssue {
                file: get_str(f, "path"),
                line: get_u32(f, "line"),
                column: get_u32(f, "column"),
                rule: f
                    .get("symbol")
                    .or_else(|| f.get("message-id"))
                    .and_then(Value::as_str)
                    .map(String::from),
                severity: Severity::from_label(&get_str(f, "type")),
                message: get_str(f, "message"),
                source: None,
            });
        }
    }

    ParsedOutput {
        issues,
        parsed: single_or_array(docs),
    }
}

fn parse_shellcheck(stdout: &str, stderr: &str) -> ParsedOutput {
    let Some((docs, _)) = json_from_either(stdout, stderr) else {
        return degrade(stdout, stderr);
    };

    let mut issues = Vec::new();
    for doc in &docs {
        let Some(findings) = doc.as_array() else {
            continue;
        };
        for f in findings {
            let code = f.get("code");
            let rule = match code {
                Some(Value::Number(n)) => Some(format!("SC{n}")),
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            };
            issues.push(LintIssue {
                file: get_str(f, "file"),
                line: get_u32(f, "line"),
                column: get_u32(f, "column"),
                rule,
                severity: Severity::from_label(&get_str(f, "level")),
                message: get_str(f, "message"),
                source: None,
            });
        }
    }

    ParsedOutput {
        issues,
        parsed: single_or_array(docs),
    }
}

fn parse_golangci(stdout: &str, stderr: &str) -> ParsedOutput {
    let Some((docs, _)) = json_from_either(stdout, stderr) else {
        return degrade(stdout, stderr);
    };

    let mut issues = Vec::new();
    for doc in &docs {
        let Some(found) = doc.get("Issues").and_then(Value::as_array) else {
            continue;
        };
        for f in found {
            let pos = f.get("Pos").cloned().unwrap_or(Value::Null);
            issues.push(LintIssue {
                file: get_str(&pos, "Filename"),
                line: get_u32(&pos, "Line"),
                column: get_u32(&pos, "Column"),
                rule: f
                    .get("FromLinter")
                    .and_then(Value::as_str)
                    .map(String::from),
                severity: Severity::from_label(&get_str(f, "Severity")),
                message: get_str(f, "Text"),
                source: None,
            });
        }
    }

    ParsedOutput {
        issues,
        parsed: single_or_array(docs),
    }
}

fn parse_rubocop(stdout: &str, stderr: &str) -> ParsedOutput {
    let Some((docs, _)) = json_from_either(stdout, stderr) else {
        return degrade(stdout, stderr);
    };

    let mut issues = Vec::new();
    for doc in &docs {
        let Some(files) = doc.get("files").and_then(Value::as_array) else {
            continue;
        };
        for file in files {
            let path = get_str(file, "path");
            let Some(offenses) = file.get("offenses").and_then(Value::as_array) else {
                continue;
            };
            for off in offenses {
                let location = off.get("location").cloned().unwrap_or(Value::Null);
                issues.push(LintIssue {
                    file: path.clone(),
                    line: get_u32(&location, "line"),
                    column: get_u32(&location, "column"),
                    rule: off
                        .get("cop_name")
                        .and_then(Value::as_str)
                        .map(String::from),
                    severity: Severity::from_label(&get_str(off, "severity")),
                    message: get_str(off, "message"),
                    source: None,
                });
            }
        }
    }

    ParsedOutput {
        issues,
        parsed: single_or_array(docs),
    }
}

fn single_or_array(mut docs: Vec<Value>) -> Value {
    if docs.len() == 1 {
        docs.remove(0)
    } else {
        Value::Array(docs)
    }
}

// ============================================================================
// Line-oriented strategies
// ============================================================================

fn colon_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // file:line[:col][:] rest  (flake8, yamllint parsable, markdownlint)
        Regex::new(r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:?\s+(?P<rest>.+)$")
            .expect("static regex")
    })
}

fn rule_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Leading diagnostic code: E501, W605, MD013, SC2086, [error] ...
        Regex::new(r"^(?:\[(?P<level>\w+)\]\s+)?(?P<rule>[A-Z]{1,3}\d{2,5})?\s*(?P<msg>.*)$")
            .expect("static regex")
    })
}

fn parse_colon_delimited(stdout: &str, stderr: &str) -> ParsedOutput {
    let primary = if stdout.trim().is_empty() {
        stderr
    } else {
        stdout
    };

    let mut issues = Vec::new();
    for line in primary.lines() {
        let Some(caps) = colon_line_re().captures(line.trim()) else {
            continue;
        };
        let rest = caps.name("rest").map_or("", |m| m.as_str());

        let (mut severity, mut rule, mut message) = (Severity::Warning, None, rest.to_string());
        if let Some(rc) = rule_prefix_re().captures(rest) {
            if let Some(level) = rc.name("level") {
                severity = Severity::from_label(level.as_str());
            }
            if let Some(r) = rc.name("rule") {
                rule = Some(r.as_str().to_string());
                // Error-class codes (Exxx) outrank style warnings
                if r.as_str().starts_with('E') {
                    severity = Severity::Error;
                }
            }
            if let Some(m) = rc.name("msg") {
                if !m.as_str().is_empty() {
                    message = m.as_str().to_string();
                }
            }
        }

        issues.push(LintIssue {
            file: caps["file"].to_string(),
            line: caps["line"].parse().unwrap_or(0),
            column: caps
                .name("col")
                .and_then(|c| c.as_str().parse().ok())
                .unwrap_or(0),
            rule,
            severity,
            message,
            source: None,
        });
    }

    ParsedOutput {
        issues,
        parsed: Value::String(primary.trim().to_string()),
    }
}

fn parse_file_list(stdout: &str, exit_code: i32) -> ParsedOutput {
    let mut issues = Vec::new();
    if exit_code != 0 {
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            issues.push(LintIssue {
                file: line.to_string(),
                line: 1,
                column: 1,
                rule: None,
                severity: Severity::Warning,
                message: "file is not formatted".to_string(),
                source: None,
            });
        }
    }
    ParsedOutput {
        issues,
        parsed: Value::String(stdout.trim().to_string()),
    }
}

fn parse_diff_style(stdout: &str, stderr: &str) -> ParsedOutput {
    let mut issues = Vec::new();
    for line in stderr.lines() {
        if let Some(file) = line.trim().strip_prefix("would reformat ") {
            issues.push(LintIssue {
                file: file.to_string(),
                line: 1,
                column: 1,
                rule: None,
                severity: Severity::Warning,
                message: "file would be reformatted".to_string(),
                source: None,
            });
        }
    }
    ParsedOutput {
        issues,
        parsed: Value::String(stdout.trim().to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
