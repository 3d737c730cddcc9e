//! Terminal output: status notes, the session table and NDJSON event lines.

use std::io::Write;

use stepforge_core::{Session, SessionStatus, StreamEvent};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

/// Check if the terminal supports color output.
pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false))
}

/// Strip ANSI escape codes from a string.
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

// Notes go to stderr so stdout stays machine-readable.

pub fn note_success(msg: &str) {
    if supports_color() {
        eprintln!("{GREEN}{BOLD}✓{RESET} {msg}");
    } else {
        eprintln!("OK: {msg}");
    }
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        eprintln!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        eprintln!("WARN: {msg}");
    }
}

pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

fn paint_status(status: SessionStatus, color: bool) -> String {
    if !color {
        return status.to_string();
    }
    let tint = match status {
        SessionStatus::Completed => GREEN,
        SessionStatus::Failed | SessionStatus::TimedOut => RED,
        SessionStatus::Cancelled => YELLOW,
        SessionStatus::Pending | SessionStatus::Running => CYAN,
    };
    format!("{tint}{status}{RESET}")
}

/// Render sessions as an aligned table, newest first as given.
pub fn render_sessions(sessions: &[Session], color: bool) -> String {
    let headers = ["ID", "AGENT", "STATUS", "STEPS", "CREATED"];
    let rows: Vec<[String; 5]> = sessions
        .iter()
        .map(|s| {
            [
                s.id.to_string(),
                s.agent_id.clone(),
                paint_status(s.status, color),
                s.current_step.map_or(0, |i| i + 1).to_string(),
                s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(strip_ansi(cell).chars().count());
        }
    }

    let pad = |cell: &str, width: usize| {
        let visible = strip_ansi(cell).chars().count();
        format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
    };

    let mut out = String::new();
    let header: Vec<String> = headers.iter().zip(&widths).map(|(h, w)| pad(h, *w)).collect();
    out.push_str(header.join("  ").trim_end());
    out.push('\n');
    for row in &rows {
        let cells: Vec<String> = row.iter().zip(&widths).map(|(c, w)| pad(c, *w)).collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }
    out
}

/// Write one event as a JSON line and flush.
pub fn write_event(writer: &mut impl Write, event: &StreamEvent) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, event)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
