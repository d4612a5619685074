//! Collection progress reporting.
//!
//! Reports observable progress during `harvest collect`, `harvest profiles`
//! and `harvest discover` so users see which target is being visited, how
//! many remain, and how far pagination has gone. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum HarvestProgressEvent {
    /// Starting target `n` of `total`.
    Target {
        command: &'static str,
        name: String,
        n: u64,
        total: u64,
    },
    /// A load-more step revealed more items.
    Items {
        command: &'static str,
        name: String,
        visible: u64,
        step: u64,
    },
    /// The target's pass ended.
    Finished {
        command: &'static str,
        name: String,
        written: u64,
        converged: bool,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait HarvestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the collection loops.
    fn report(&self, event: HarvestProgressEvent);
}

/// Human-friendly progress on stderr: "collect Phở A  target 3 / 120".
pub struct StderrProgress;

impl HarvestProgressReporter for StderrProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let line = match &event {
            HarvestProgressEvent::Target {
                command,
                name,
                n,
                total,
            } => format!(
                "{} {}  target {} / {}\n",
                command,
                name,
                format_number(*n),
                format_number(*total)
            ),
            HarvestProgressEvent::Items {
                command,
                name,
                visible,
                step,
            } => format!(
                "{} {}  load-more {}  {} items visible\n",
                command,
                name,
                step,
                format_number(*visible)
            ),
            HarvestProgressEvent::Finished {
                command,
                name,
                written,
                converged,
            } => format!(
                "{} {}  done  {} written{}\n",
                command,
                name,
                format_number(*written),
                if *converged { "  (caught up)" } else { "" }
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl HarvestProgressReporter for JsonProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let obj = match &event {
            HarvestProgressEvent::Target {
                command,
                name,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "command": command,
                "phase": "target",
                "target": name,
                "n": n,
                "total": total
            }),
            HarvestProgressEvent::Items {
                command,
                name,
                visible,
                step,
            } => serde_json::json!({
                "event": "progress",
                "command": command,
                "phase": "load_more",
                "target": name,
                "visible": visible,
                "step": step
            }),
            HarvestProgressEvent::Finished {
                command,
                name,
                written,
                converged,
            } => serde_json::json!({
                "event": "progress",
                "command": command,
                "phase": "finished",
                "target": name,
                "written": written,
                "converged": converged
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl HarvestProgressReporter for NoProgress {
    fn report(&self, _event: HarvestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value.
    pub fn parse(value: Option<&str>) -> anyhow::Result<Self> {
        match value {
            None => Ok(Self::default_for_tty()),
            Some("off") | Some("none") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be off, human, or json.",
                other
            ),
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn HarvestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_mode_parse() {
        assert_eq!(ProgressMode::parse(Some("json")).unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::parse(Some("off")).unwrap(), ProgressMode::Off);
        assert!(ProgressMode::parse(Some("loud")).is_err());
    }
}
