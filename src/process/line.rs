//! Fetch-tool output grammar
//!
//! The tool prints three kinds of lines: timestamped log lines
//! (`HH:MM:SS.mmm LEVEL : message`), per-stream progress lines
//! (`Vid 1920x1080 | 2 Mbps ━━━━ 120/240 50.00% ...`) and everything else.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Severity of a tool log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolLevel {
    /// DEBUG / VERBOSE / TRACE
    Debug,
    /// INFO
    Info,
    /// WARN / WARNING
    Warn,
    /// ERROR / FATAL
    Error,
}

impl ToolLevel {
    /// Parse the level token; unknown tokens read as `Info`
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "DEBUG" | "VERBOSE" | "TRACE" => Self::Debug,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" | "FATAL" | "CRITICAL" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Stream kind of a progress line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Video
    Vid,
    /// Audio
    Aud,
    /// Subtitles
    Sub,
}

/// One classified output line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Timestamped log line
    Log {
        /// Mapped severity
        level: ToolLevel,
        /// Message text after the colon
        message: String,
    },
    /// Per-stream progress
    Progress {
        /// Stream kind
        kind: StreamKind,
        /// Stream label (resolution, language, ...)
        label: String,
        /// Percent complete
        percent: f32,
        /// Completed and total segments, when printed
        segments: Option<(u64, u64)>,
    },
    /// Anything else
    Freeform(String),
}

impl Line {
    /// Key identifying the stream a progress line belongs to
    pub fn stream_key(&self) -> Option<String> {
        match self {
            Line::Progress { kind, label, .. } => Some(format!("{:?} {}", kind, label)),
            _ => None,
        }
    }
}

struct Patterns {
    ansi: Regex,
    log: Regex,
    progress: Regex,
    percent: Regex,
    segments: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                ansi: Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").ok()?,
                log: Regex::new(r"^\d{2}:\d{2}:\d{2}\.\d{3}\s+(?P<level>[A-Za-z]+)\s*:\s?(?P<msg>.*)$").ok()?,
                progress: Regex::new(r"^(?P<kind>Vid|Aud|Sub)\s+(?P<label>\S+)").ok()?,
                percent: Regex::new(r"(?P<pct>\d+(?:\.\d+)?)%").ok()?,
                segments: Regex::new(r"(?P<done>\d+)/(?P<total>\d+)").ok()?,
            })
        })
        .as_ref()
}

/// Remove ANSI escape sequences
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    match patterns() {
        Some(p) if line.contains('\x1b') => p.ansi.replace_all(line, ""),
        _ => Cow::Borrowed(line),
    }
}

/// Classify one output record
///
/// Returns `None` for lines that are empty once ANSI escapes and whitespace are removed.
pub fn classify_line(raw: &str) -> Option<Line> {
    let stripped = strip_ansi(raw);
    let line = stripped.trim();
    if line.is_empty() {
        return None;
    }
    let Some(p) = patterns() else {
        return Some(Line::Freeform(line.to_string()));
    };

    if let Some(caps) = p.log.captures(line) {
        return Some(Line::Log {
            level: ToolLevel::parse(&caps["level"]),
            message: caps["msg"].trim().to_string(),
        });
    }

    if let Some(caps) = p.progress.captures(line) {
        let percent = p
            .percent
            .captures_iter(line)
            .last()
            .and_then(|c| c["pct"].parse::<f32>().ok());
        if let Some(percent) = percent {
            let kind = match &caps["kind"] {
                "Vid" => StreamKind::Vid,
                "Aud" => StreamKind::Aud,
                _ => StreamKind::Sub,
            };
            let segments = p.segments.captures(line).and_then(|c| {
                Some((c["done"].parse().ok()?, c["total"].parse().ok()?))
            });
            return Some(Line::Progress {
                kind,
                label: caps["label"].to_string(),
                percent,
                segments,
            });
        }
    }

    Some(Line::Freeform(line.to_string()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamped_lines_are_logs() {
        assert_eq!(
            classify_line("00:00:12.345 WARN : segment retry"),
            Some(Line::Log {
                level: ToolLevel::Warn,
                message: "segment retry".to_string()
            })
        );
        assert_eq!(
            classify_line("12:01:02.003 ERROR : failed"),
            Some(Line::Log {
                level: ToolLevel::Error,
                message: "failed".to_string()
            })
        );
    }

    #[test]
    fn progress_lines_carry_stream_and_percent() {
        let line = classify_line("Vid 1920x1080 | 4500 Kbps | avc1 ━━━━━━━━ 120/240 50.00% 12.3MB/s").unwrap();
        match line {
            Line::Progress {
                kind,
                label,
                percent,
                segments,
            } => {
                assert_eq!(kind, StreamKind::Vid);
                assert_eq!(label, "1920x1080");
                assert!((percent - 50.0).abs() < f32::EPSILON);
                assert_eq!(segments, Some((120, 240)));
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn ansi_escapes_are_removed() {
        let line = classify_line("\x1b[32m00:00:01.000 INFO : \x1b[0mstart").unwrap();
        assert_eq!(
            line,
            Line::Log {
                level: ToolLevel::Info,
                message: "start".to_string()
            }
        );
    }

    #[test]
    fn empty_and_unknown_lines() {
        assert_eq!(classify_line("   "), None);
        assert_eq!(classify_line("\x1b[0m"), None);
        assert_eq!(
            classify_line("N_m3u8DL-RE (Beta version) 20230628"),
            Some(Line::Freeform("N_m3u8DL-RE (Beta version) 20230628".to_string()))
        );
        assert_eq!(
            classify_line("Vid 1920x1080 waiting"),
            Some(Line::Freeform("Vid 1920x1080 waiting".to_string())),
            "progress lines need a percentage"
        );
    }
}
