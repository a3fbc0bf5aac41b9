//! Classification of the transfer tool's combined output
//!
//! The classifier only looks at lines; it never touches the process. The
//! caller feeds it lines as they arrive and stops reading once it reports
//! [`OutputEvent::CorruptionLimit`].

/// Phrase the tool prints when every task of a run finished
pub const SUCCESS_MARKER: &str = "finished, 0 tasks failed";
/// Transient corruption signal from a truncated blob read
pub const CORRUPTION_MARKER: &str = "unexpected EOF";
/// Occurrences of [`CORRUPTION_MARKER`] after which the transfer is abandoned
pub const CORRUPTION_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Line,
    SuccessMarker,
    Corruption { seen: usize },
    CorruptionLimit,
}

/// How a finished (or abandoned) transfer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Success marker seen and the process exited zero
    Completed,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct OutputClassifier {
    success_seen: bool,
    corruption_seen: usize,
    lines: usize,
}

impl OutputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, line: &str) -> OutputEvent {
        self.lines += 1;
        if line.contains(CORRUPTION_MARKER) {
            self.corruption_seen += 1;
            if self.corruption_seen >= CORRUPTION_LIMIT {
                return OutputEvent::CorruptionLimit;
            }
            return OutputEvent::Corruption {
                seen: self.corruption_seen,
            };
        }
        if line.to_ascii_lowercase().contains(SUCCESS_MARKER) {
            self.success_seen = true;
            return OutputEvent::SuccessMarker;
        }
        OutputEvent::Line
    }

    pub fn success_seen(&self) -> bool {
        self.success_seen
    }

    pub fn corruption_seen(&self) -> usize {
        self.corruption_seen
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Final verdict once the stream ended. `exit_ok` is `None` when the
    /// process was abandoned before it exited.
    pub fn finish(&self, exit_ok: Option<bool>) -> Classification {
        if self.corruption_seen >= CORRUPTION_LIMIT {
            return Classification::Failed(format!(
                "aborted after {} \"{}\" lines",
                self.corruption_seen, CORRUPTION_MARKER
            ));
        }
        match exit_ok {
            Some(false) => Classification::Failed("transfer tool exited with non-zero status".to_string()),
            None => Classification::Failed("transfer tool was abandoned".to_string()),
            Some(true) if !self.success_seen => {
                Classification::Failed("success marker not found in transfer output".to_string())
            }
            Some(true) => Classification::Completed,
        }
    }
}

/// Classify a complete output. Lines after the corruption limit are not read.
pub fn classify<'a>(lines: impl IntoIterator<Item = &'a str>, exit_ok: bool) -> Classification {
    let mut classifier = OutputClassifier::new();
    for line in lines {
        if classifier.observe(line) == OutputEvent::CorruptionLimit {
            return classifier.finish(None);
        }
    }
    classifier.finish(Some(exit_ok))
}
