//! Structured build diagnostics parsed from raw compiler output.
//!
//! Record lines have the shape `<file>(<line>,<col>): error <CODE>: <message>`.
//! Indented lines that follow a record continue its message. Any other line
//! closes the current record and is ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

static RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^\s(][^(]*)\((?P<line>\d+),(?P<col>\d+)\):\s*error\s+(?P<code>[A-Za-z]*\d+):\s*(?P<message>.*)$",
    )
    .expect("diagnostic regex")
});

/// One compiler error. Only [`parse_diagnostics`] creates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDiagnostic {
    file: String,
    line: u32,
    column: u32,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtype: Option<&'static str>,
}

impl BuildDiagnostic {
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn subtype(&self) -> Option<&'static str> {
        self.subtype
    }
}

impl std::fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({},{}): error {}: {}",
            self.file, self.line, self.column, self.code, self.message
        )
    }
}

fn subtype_for(code: &str) -> Option<&'static str> {
    match code {
        "TS2307" => Some("module-not-found"),
        "TS2305" | "TS2614" => Some("missing-export"),
        "TS2322" | "TS2345" => Some("type-mismatch"),
        "TS2739" | "TS2741" => Some("missing-property"),
        "TS2353" => Some("unknown-property"),
        "TS6133" => Some("unused"),
        _ => None,
    }
}

/// Parse raw build output into diagnostics, in output order.
pub fn parse_diagnostics(raw: &str) -> Vec<BuildDiagnostic> {
    let mut records: Vec<BuildDiagnostic> = Vec::new();
    let mut open = false;

    for line in raw.lines() {
        let trimmed_end = line.trim_end();
        if trimmed_end.trim().is_empty() {
            continue;
        }

        if let Some(caps) = RECORD_RE.captures(trimmed_end.trim_start()) {
            let (Ok(line_no), Ok(column)) = (caps["line"].parse(), caps["col"].parse()) else {
                debug!(line = %trimmed_end, "diagnostic position out of range");
                open = false;
                continue;
            };
            let code = caps["code"].to_string();
            records.push(BuildDiagnostic {
                file: caps["file"].trim().to_string(),
                line: line_no,
                column,
                subtype: subtype_for(&code),
                code,
                message: caps["message"].trim().to_string(),
            });
            open = true;
            continue;
        }

        let indented = trimmed_end.starts_with(char::is_whitespace);
        match records.last_mut() {
            Some(last) if open && indented => {
                last.message.push('\n');
                last.message.push_str(trimmed_end.trim());
            }
            _ => {
                debug!(line = %trimmed_end, "ignoring unparsed build output");
                open = false;
            }
        }
    }

    records
}
