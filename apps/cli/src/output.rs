//! Output formatting utilities

use pullman_core::TaskSnapshot;
use std::path::Path;
use tabled::Tabled;

/// Row of the `--output table` summary
#[derive(Tabled)]
pub struct TaskRow {
    pub id: String,
    pub state: String,
    pub progress: String,
    pub location: String,
}

impl From<&TaskSnapshot> for TaskRow {
    fn from(snapshot: &TaskSnapshot) -> Self {
        let location = match (&snapshot.path, &snapshot.error) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "-".to_string(),
        };

        Self {
            id: snapshot.id.to_string(),
            state: snapshot.state.to_string(),
            progress: snapshot
                .progress
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            location,
        }
    }
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Size of the file at `path`, or `?` when it cannot be read
pub fn file_size(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|meta| format_bytes(meta.len()))
        .unwrap_or_else(|_| "?".to_string())
}

pub fn format_timeout(seconds: u64) -> String {
    if seconds == 0 {
        "none".to_string()
    } else {
        format!("{}s", seconds)
    }
}
