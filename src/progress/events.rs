use anyhow::Result;
use serde::Deserialize;

/// Phase label carried by a status event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    Starting,
    Fetching,
    Analyzing,
    Predicting,
    Recording,
    Complete,
    Error,
    /// Interim labels the service also emits (e.g. "gemini", "warning",
    /// "combining"); treated as ordinary non-terminal updates
    Other(String),
}

impl AnalysisStatus {
    fn from_label(label: &str) -> Self {
        match label {
            "starting" => Self::Starting,
            "fetching" => Self::Fetching,
            "analyzing" => Self::Analyzing,
            "predicting" => Self::Predicting,
            "recording" => Self::Recording,
            "complete" => Self::Complete,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Fetching => "fetching",
            Self::Analyzing => "analyzing",
            Self::Predicting => "predicting",
            Self::Recording => "recording",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Other(label) => label,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// One `data:` payload from the progress channel
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Heartbeat; carries no state change
    Keepalive,
    Status(StatusUpdate),
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: AnalysisStatus,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub detail: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    message: Option<String>,
    progress: Option<u8>,
    detail: Option<String>,
    timestamp: Option<String>,
}

impl ProgressEvent {
    pub fn parse(data: &str) -> Result<Self> {
        let raw: RawEvent = serde_json::from_str(data)?;

        if raw.kind.as_deref() == Some("keepalive") {
            return Ok(Self::Keepalive);
        }

        let Some(status) = raw.status else {
            anyhow::bail!("progress payload has neither type nor status");
        };

        Ok(Self::Status(StatusUpdate {
            status: AnalysisStatus::from_label(&status),
            message: raw.message,
            progress: raw.progress,
            detail: raw.detail,
            timestamp: raw.timestamp,
        }))
    }
}

/// One accumulated detail line, kept in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailLine {
    pub text: String,
    pub timestamp: Option<String>,
}

/// Running view of an analysis run, published after every status event
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub status: AnalysisStatus,
    pub message: String,
    pub progress: u8,
    pub details: Vec<DetailLine>,
}

impl ProgressSnapshot {
    pub fn initial() -> Self {
        Self {
            status: AnalysisStatus::Starting,
            message: "Initializing analysis...".to_string(),
            progress: 0,
            details: Vec::new(),
        }
    }

    /// Fold a status update in. Progress only moves when the event
    /// carries it; details append in arrival order, with the window
    /// dropping oldest entries but never reordering.
    pub fn apply(&mut self, update: &StatusUpdate, detail_window: usize) {
        self.status = update.status.clone();
        if let Some(message) = &update.message {
            self.message = message.clone();
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(detail) = &update.detail {
            self.details.push(DetailLine {
                text: detail.clone(),
                timestamp: update.timestamp.clone(),
            });
            if self.details.len() > detail_window {
                let excess = self.details.len() - detail_window;
                self.details.drain(..excess);
            }
        }
    }
}
