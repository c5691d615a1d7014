//! Rendering of responses for display, with credential redaction.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Result;
use crate::error::Error;
use crate::response::Response;
use crate::util::canonical_header_name;

pub const REDACTED: &str = "***REDACTED***";

const VISIBLE_EDGE_CHARS: usize = 6;
const MIN_PARTIAL_REDACTION_CHARS: usize = 12;

const PARTIALLY_REDACTED_HEADERS: &[&str] = &[
    "x-api-key",
    "x-auth-token",
    "cookie",
    "set-cookie",
    "x-csrf-token",
];

const BINARY_CONTENT_TYPE_PREFIXES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "font/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/gzip",
    "application/x-tar",
    "application/x-7z-compressed",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Auto,
    Json,
    Raw,
}

impl OutputFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Json => "json",
            Self::Raw => "raw",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "raw" => Ok(Self::Raw),
            _ => Err(Error::InvalidOutputFormat {
                value: value.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputTarget {
    #[default]
    Stdout,
    File(PathBuf),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Formatter {
    verbose: bool,
    format: OutputFormat,
}

impl Formatter {
    pub const fn new(verbose: bool, format: OutputFormat) -> Self {
        Self { verbose, format }
    }

    pub fn format(&self, response: &Response) -> String {
        let body = self.format_body(response.body(), response.content_type());
        if !self.verbose {
            return body;
        }

        let mut output = String::new();
        let _ = writeln!(output, "< {}", response.status_text());
        let _ = writeln!(output, "Duration: {:?}", response.elapsed());
        output.push_str("Response Headers:\n");

        let mut lines: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = String::from_utf8_lossy(value.as_bytes());
                (
                    canonical_header_name(name.as_str()),
                    redact_sensitive_header(name.as_str(), &value),
                )
            })
            .collect();
        lines.sort();
        for (name, value) in lines {
            let _ = writeln!(output, "  {name}: {value}");
        }

        output.push('\n');
        output.push_str(&body);
        output
    }

    pub fn format_body(&self, body: &[u8], content_type: Option<&str>) -> String {
        match self.format {
            OutputFormat::Json => pretty_json_or_raw(body),
            OutputFormat::Raw => String::from_utf8_lossy(body).into_owned(),
            OutputFormat::Auto => {
                let is_json_content = content_type
                    .map(|value| value.to_ascii_lowercase().contains("application/json"))
                    .unwrap_or(false);
                if is_json_content {
                    pretty_json_or_raw(body)
                } else {
                    String::from_utf8_lossy(body).into_owned()
                }
            }
        }
    }
}

fn pretty_json_or_raw(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Masks credential-bearing header values for display. Header names are
/// matched case-insensitively; everything else passes through.
pub fn redact_sensitive_header(name: &str, value: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    if name == "authorization" {
        let trimmed = value.trim();
        let Some((scheme, token)) = trimmed.split_once(' ') else {
            return REDACTED.to_owned();
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return REDACTED.to_owned();
        }
        return format!("Bearer {}", mask_edges(token.trim()));
    }
    if PARTIALLY_REDACTED_HEADERS.contains(&name.as_str()) {
        return mask_edges(value);
    }
    value.to_owned()
}

/// First and last six characters of a long token, the fixed marker otherwise.
pub fn redact_token(token: &str) -> String {
    mask_edges(token)
}

fn mask_edges(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MIN_PARTIAL_REDACTION_CHARS {
        return REDACTED.to_owned();
    }
    let head: String = chars[..VISIBLE_EDGE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_EDGE_CHARS..].iter().collect();
    format!("{head}...{tail}")
}

pub fn is_json(data: &[u8]) -> bool {
    !data.is_empty() && serde_json::from_slice::<serde::de::IgnoredAny>(data).is_ok()
}

pub fn is_binary_content(data: &[u8], content_type: Option<&str>) -> bool {
    if let Some(content_type) = content_type {
        let lowered = content_type.to_ascii_lowercase();
        if BINARY_CONTENT_TYPE_PREFIXES
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
        {
            return true;
        }
    }
    data.contains(&0) || std::str::from_utf8(data).is_err()
}

/// Writes formatted text, appending a trailing newline on stdout.
pub fn write_output(text: &str, target: &OutputTarget) -> Result<()> {
    match target {
        OutputTarget::Stdout => {
            let mut stdout = std::io::stdout().lock();
            let result = if text.ends_with('\n') {
                stdout.write_all(text.as_bytes())
            } else {
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|()| stdout.write_all(b"\n"))
            };
            result
                .and_then(|()| stdout.flush())
                .map_err(|source| Error::WriteOutput {
                    path: PathBuf::from("<stdout>"),
                    source,
                })
        }
        OutputTarget::File(path) => write_file(path, text.as_bytes()),
    }
}

/// Writes bytes untouched.
pub fn write_raw_output(data: &[u8], target: &OutputTarget) -> Result<()> {
    match target {
        OutputTarget::Stdout => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(data)
                .and_then(|()| stdout.flush())
                .map_err(|source| Error::WriteOutput {
                    path: PathBuf::from("<stdout>"),
                    source,
                })
        }
        OutputTarget::File(path) => write_file(path, data),
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|source| Error::WriteOutput {
        path: path.to_path_buf(),
        source,
    })
}
