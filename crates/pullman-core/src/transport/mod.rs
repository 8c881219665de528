//! Transport seam
//!
//! A transport performs the actual transfers for one session. It hands out
//! opaque handles and reports what happens to them through an [`EventSink`].
//! Sessions hold the transport; the transport only holds a non-owning
//! reference back to the sink.

mod http;

pub use http::*;

use crate::error::PullmanError;
use async_trait::async_trait;
use pullman_types::{Request, ResumeToken, SessionKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Identity of a transport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportId(Uuid);

impl TransportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one transfer run by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportHandle(Uuid);

impl TransportHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransportHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session level settings a transport is built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfiguration {
    pub kind: SessionKind,
    pub allows_cellular_access: bool,
    pub waits_for_connectivity: bool,
}

impl TransportConfiguration {
    /// Configuration for `kind`, taking the policy flags from the request
    /// that caused the session to be created
    pub fn for_request(kind: SessionKind, request: &Request) -> Self {
        Self {
            kind,
            allows_cellular_access: request.allows_cellular_access,
            waits_for_connectivity: request.waits_for_connectivity,
        }
    }
}

/// Something that happened to a transfer
#[derive(Debug)]
pub enum TransportEvent {
    DidWriteData {
        bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected_to_write: u64,
    },
    DidResumeAtOffset {
        file_offset: u64,
        expected_total_bytes: u64,
    },
    /// The body is complete at `location`; the file stays valid until the
    /// sink returns
    DidFinishDownloading { location: PathBuf },
    /// Terminal event of a transfer. `None` means success.
    DidComplete { error: Option<PullmanError> },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::DidWriteData { .. } => "did_write_data",
            TransportEvent::DidResumeAtOffset { .. } => "did_resume_at_offset",
            TransportEvent::DidFinishDownloading { .. } => "did_finish_downloading",
            TransportEvent::DidComplete { .. } => "did_complete",
        }
    }
}

/// Performs transfers for a single session
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Start a fresh transfer for `request`
    fn start(&self, request: &Request) -> TransportHandle;

    /// Continue a transfer from a token produced by this transport
    fn resume_from_token(&self, token: &ResumeToken) -> TransportHandle;

    fn cancel(&self, handle: TransportHandle);

    /// Stop the transfer, producing a token when it can be resumed later
    async fn cancel_producing_resume_token(&self, handle: TransportHandle) -> Option<ResumeToken>;
}

/// Receives transport events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn session_updated(
        &self,
        transport: TransportId,
        handle: TransportHandle,
        event: TransportEvent,
    );
}

/// Builds a transport for a newly created session.
///
/// Called while the manager holds its session map lock, so it must not
/// block or call back into the manager.
pub trait TransportFactory: Send + Sync {
    fn make_transport(
        &self,
        configuration: TransportConfiguration,
        sink: Weak<dyn EventSink>,
    ) -> Arc<dyn Transport>;
}
