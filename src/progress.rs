//! Sync progress reporting.
//!
//! Reports observable progress during `docsync sync` so users see what is
//! being discovered, how much work was planned, and how far the run is.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! The reporter is injected into the orchestrator rather than looked up
//! globally.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Connector is enumerating items (total unknown).
    Discovering { connector: String },
    /// Change detection finished.
    Planned {
        connector: String,
        discovered: u64,
        queued: u64,
        skipped: u64,
    },
    /// A batch is starting its transfer phase.
    Batch {
        connector: String,
        batch: u64,
        batches: u64,
        items: u64,
    },
    /// An item reached a terminal status.
    Item {
        connector: String,
        n: u64,
        total: u64,
        name: String,
        ok: bool,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync filesystem:docs  12 / 340  deck.pptx  ok".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { connector } => {
                format!("sync {}  discovering...\n", connector)
            }
            SyncProgressEvent::Planned {
                connector,
                discovered,
                queued,
                skipped,
            } => format!(
                "sync {}  {} discovered, {} to process, {} unchanged\n",
                connector,
                format_number(*discovered),
                format_number(*queued),
                format_number(*skipped)
            ),
            SyncProgressEvent::Batch {
                connector,
                batch,
                batches,
                items,
            } => format!(
                "sync {}  batch {} / {}  ({} items)\n",
                connector, batch, batches, items
            ),
            SyncProgressEvent::Item {
                connector,
                n,
                total,
                name,
                ok,
            } => format!(
                "sync {}  {} / {}  {}  {}\n",
                connector,
                format_number(*n),
                format_number(*total),
                name,
                if *ok { "ok" } else { "FAILED" }
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovering { connector } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "discovering"
            }),
            SyncProgressEvent::Planned {
                connector,
                discovered,
                queued,
                skipped,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "planned",
                "discovered": discovered,
                "queued": queued,
                "skipped": skipped
            }),
            SyncProgressEvent::Batch {
                connector,
                batch,
                batches,
                items,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "batch",
                "batch": batch,
                "batches": batches,
                "items": items
            }),
            SyncProgressEvent::Item {
                connector,
                n,
                total,
                name,
                ok,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "processing",
                "n": n,
                "total": total,
                "name": name,
                "ok": ok
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

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
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

    /// Parse `--progress auto|off|human|json`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::default_for_tty()),
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
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
    fn parse_progress_modes() {
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
