//! Shared types for Pullman
//!
//! This crate contains the immutable value objects consumed by the
//! download core and the CLI: requests, destinations, progress and
//! session kinds.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use url::Url;

/// Identifier used for the default background session.
pub const DEFAULT_BACKGROUND_IDENTIFIER: &str = "pullman.background";

// ============================================================================
// Request Types
// ============================================================================

/// Describes a request to download a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Resource URL
    pub source: Url,
    /// Deduplication key inside a session, defaults to the source URL
    pub identifier: String,
    /// Optional destination for the resource
    pub destination: Option<Destination>,
    /// Run the download on a background session
    pub keep_alive: bool,
    /// Use a persisted (non-ephemeral) foreground session
    pub should_persist: bool,
    /// Whether connections may be made over a cellular network
    pub allows_cellular_access: bool,
    /// Wait for connectivity instead of failing immediately
    pub waits_for_connectivity: bool,
}

impl Request {
    pub fn new(source: Url) -> Self {
        Self {
            identifier: source.as_str().to_string(),
            source,
            destination: None,
            keep_alive: false,
            should_persist: false,
            allows_cellular_access: true,
            waits_for_connectivity: false,
        }
    }

    /// Parse `source` and build a foreground request for it
    pub fn parse(source: &str) -> Result<Self, url::ParseError> {
        Url::parse(source).map(Self::new)
    }

    /// Background request that waits for connectivity and stays off cellular
    pub fn standard(source: Url, destination: Option<Destination>) -> Self {
        Self {
            destination,
            keep_alive: true,
            allows_cellular_access: false,
            waits_for_connectivity: true,
            ..Self::new(source)
        }
    }

    /// Same background policy as [`Request::standard`].
    ///
    /// `should_persist` is also set, but it only picks the foreground kind,
    /// so it has no effect unless `keep_alive` is later cleared.
    pub fn low_priority(source: Url, destination: Option<Destination>) -> Self {
        Self {
            should_persist: true,
            ..Self::standard(source, destination)
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_should_persist(mut self, should_persist: bool) -> Self {
        self.should_persist = should_persist;
        self
    }

    pub fn with_cellular_access(mut self, allowed: bool) -> Self {
        self.allows_cellular_access = allowed;
        self
    }

    pub fn with_waits_for_connectivity(mut self, waits: bool) -> Self {
        self.waits_for_connectivity = waits;
        self
    }

    /// Session kind this request is categorised under
    pub fn session_kind(&self, background: &BackgroundSession) -> SessionKind {
        if self.keep_alive {
            SessionKind::Background(background.clone())
        } else {
            SessionKind::Foreground {
                is_ephemeral: !self.should_persist,
            }
        }
    }
}

// ============================================================================
// Destination Types
// ============================================================================

/// Where a finished resource should be stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    /// Directory for the resource, without the file name
    pub path: PathBuf,
    /// File name including extension
    pub file_name: Option<String>,
}

impl Destination {
    pub fn new(path: impl Into<PathBuf>, file_name: Option<String>) -> Self {
        Self {
            path: path.into(),
            file_name,
        }
    }

    /// Split a full file path into directory and file name
    pub fn from_full_path(full_path: impl AsRef<Path>) -> Self {
        let full_path = full_path.as_ref();
        let file_name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let path = full_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self { path, file_name }
    }

    /// Directory joined with the file name, if any
    pub fn full_path(&self) -> PathBuf {
        match &self.file_name {
            Some(name) => self.path.join(name),
            None => self.path.clone(),
        }
    }

    fn sort_key(&self) -> String {
        format!(
            "{}{}",
            self.path.to_string_lossy(),
            self.file_name.as_deref().unwrap_or_default()
        )
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Destination {}

impl Hash for Destination {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl PartialOrd for Destination {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Destination {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

// ============================================================================
// Session Types
// ============================================================================

/// Category a transport session is cached under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionKind {
    Foreground { is_ephemeral: bool },
    Background(BackgroundSession),
}

/// Parameters of a background session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackgroundSession {
    /// Unique identifier for the background session
    pub identifier: String,
    /// Transfers may be deferred by the system for power/performance
    pub is_discretionary: bool,
    /// Wake the host when transfers finish
    pub sends_launch_events: bool,
}

impl BackgroundSession {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            is_discretionary: false,
            sends_launch_events: true,
        }
    }
}

impl Default for BackgroundSession {
    fn default() -> Self {
        Self::new(DEFAULT_BACKGROUND_IDENTIFIER)
    }
}

impl SessionKind {
    pub fn is_background(&self) -> bool {
        matches!(self, SessionKind::Background(_))
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Foreground { is_ephemeral: true } => f.write_str("Ephemeral"),
            SessionKind::Foreground { is_ephemeral: false } => f.write_str("Persisted"),
            SessionKind::Background(_) => f.write_str("Background"),
        }
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// Byte counters of a running download.
///
/// Ordering compares `total_bytes_written` first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Progress {
    pub total_bytes_written: u64,
    pub total_bytes_expected_to_write: u64,
}

impl Progress {
    /// No bytes written, size unknown
    pub const ZERO: Progress = Progress {
        total_bytes_written: 0,
        total_bytes_expected_to_write: 0,
    };

    pub fn new(total_bytes_written: u64, total_bytes_expected_to_write: u64) -> Self {
        Self {
            total_bytes_written,
            total_bytes_expected_to_write,
        }
    }

    /// Completion in `0.0..=1.0` (not clamped), zero when the size is unknown
    pub fn fraction_completed(&self) -> f64 {
        if self.total_bytes_expected_to_write == 0 {
            return 0.0;
        }

        self.total_bytes_written as f64 / self.total_bytes_expected_to_write as f64
    }

    pub fn percentage_completed(&self) -> u64 {
        (self.fraction_completed() * 100.0).floor() as u64
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes_expected_to_write > 0
            && self.total_bytes_written >= self.total_bytes_expected_to_write
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/100", self.percentage_completed())
    }
}

// ============================================================================
// Resume Types
// ============================================================================

/// Opaque transport data needed to continue a partial transfer
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ResumeToken {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// Token contents are transport private
impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_progress_halfway() {
        let progress = Progress::new(500, 1000);
        assert_eq!(progress.fraction_completed(), 0.5);
        assert_eq!(progress.percentage_completed(), 50);
        assert_eq!(progress.to_string(), "50/100");
    }

    #[test]
    fn test_progress_unknown_size() {
        let progress = Progress::new(4096, 0);
        assert_eq!(progress.fraction_completed(), 0.0);
        assert_eq!(progress.percentage_completed(), 0);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_percentage_floors() {
        assert_eq!(Progress::new(999, 1000).percentage_completed(), 99);
        assert_eq!(Progress::new(1, 3).percentage_completed(), 33);
        // Over-delivery is reported as-is
        assert_eq!(Progress::new(1500, 1000).percentage_completed(), 150);
    }

    #[test]
    fn test_progress_orders_by_written_bytes() {
        assert!(Progress::new(10, 1000) < Progress::new(20, 100));
        assert_eq!(Progress::ZERO, Progress::default());
    }

    #[test]
    fn test_request_identifier_defaults_to_source() {
        let request = Request::parse("http://x/file.txt").unwrap();
        assert_eq!(request.identifier, "http://x/file.txt");

        let request = request.with_identifier("custom");
        assert_eq!(request.identifier, "custom");
    }

    #[test]
    fn test_request_session_kind() {
        let background = BackgroundSession::default();
        let request = Request::new(url("http://x/a"));
        assert_eq!(
            request.session_kind(&background),
            SessionKind::Foreground { is_ephemeral: true }
        );

        let persisted = request.clone().with_should_persist(true);
        assert_eq!(
            persisted.session_kind(&background),
            SessionKind::Foreground { is_ephemeral: false }
        );

        let kept = request.with_keep_alive(true);
        assert_eq!(
            kept.session_kind(&background),
            SessionKind::Background(background)
        );
    }

    #[test]
    fn test_standard_request_policy() {
        let request = Request::standard(url("http://x/a"), None);
        assert!(request.keep_alive);
        assert!(!request.allows_cellular_access);
        assert!(request.waits_for_connectivity);
    }

    #[test]
    fn test_low_priority_shares_standard_policy() {
        let background = BackgroundSession::new("bg");
        let standard = Request::standard(url("http://x/a"), None);
        let low = Request::low_priority(url("http://x/a"), None);

        assert!(low.should_persist);
        assert_eq!(low.session_kind(&background), standard.session_kind(&background));
        assert_eq!(
            low.clone().with_keep_alive(false).session_kind(&background),
            SessionKind::Foreground { is_ephemeral: false }
        );
    }

    #[test]
    fn test_session_kind_equality_covers_all_fields() {
        let a = SessionKind::Background(BackgroundSession::new("a"));
        let mut other = BackgroundSession::new("a");
        other.is_discretionary = true;

        assert_ne!(a, SessionKind::Background(other));
        assert_eq!(a, SessionKind::Background(BackgroundSession::new("a")));
        assert_eq!(a.to_string(), "Background");
        assert_eq!(
            SessionKind::Foreground { is_ephemeral: false }.to_string(),
            "Persisted"
        );
    }

    #[test]
    fn test_destination_full_path() {
        let destination = Destination::new("/tmp/out", Some("file.txt".to_string()));
        assert_eq!(destination.full_path(), PathBuf::from("/tmp/out/file.txt"));

        let split = Destination::from_full_path("/tmp/out/file.txt");
        assert_eq!(split.path, PathBuf::from("/tmp/out"));
        assert_eq!(split.file_name.as_deref(), Some("file.txt"));
    }

    #[test]
    fn test_destination_compares_by_concatenation() {
        let a = Destination::new("/tmp/a", Some("b.txt".to_string()));
        let b = Destination::new("/tmp/", Some("ab.txt".to_string()));
        assert_eq!(a, b);

        let c = Destination::new("/tmp/a", Some("c.txt".to_string()));
        assert!(a < c);
    }

    #[test]
    fn test_resume_token_debug_hides_contents() {
        let token = ResumeToken::new(b"secret".to_vec());
        assert_eq!(format!("{:?}", token), "ResumeToken(6 bytes)");
        assert_eq!(serde_json::to_string(&token).unwrap(), "[115,101,99,114,101,116]");
    }
}
