//! Shared fixtures for engine integration tests.
//!
//! `FakeFactory` hands out `FakeTransport`s that record every call made on
//! them and let the test push transport events back through the manager.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pullman_core::transport::{
    EventSink, Transport, TransportConfiguration, TransportEvent, TransportFactory,
    TransportHandle, TransportId,
};
use pullman_core::{Manager, ManagerConfig, PullmanError, Request, ResumeToken, TokioFileSystem};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tempfile::TempDir;

pub const RESUME_DATA: &[u8] = b"resume-data";

/// A call made on a fake transport
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(String),
    Resume(Vec<u8>),
    Cancel(TransportHandle),
    Pause(TransportHandle),
}

pub struct FakeTransport {
    id: TransportId,
    pub configuration: TransportConfiguration,
    sink: Weak<dyn EventSink>,
    calls: Mutex<Vec<Call>>,
    handles: Mutex<Vec<TransportHandle>>,
    pause_token: Mutex<Option<ResumeToken>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Start(_) | Call::Resume(_)))
            .count()
    }

    /// Handle returned by the most recent start or resume
    pub fn last_handle(&self) -> TransportHandle {
        *self.handles.lock().last().expect("no transfer started")
    }

    /// Token returned by the next pause, `None` for a non-resumable transfer
    pub fn set_pause_token(&self, token: Option<ResumeToken>) {
        *self.pause_token.lock() = token;
    }

    pub async fn emit(&self, handle: TransportHandle, event: TransportEvent) {
        let sink = self.sink.upgrade().expect("manager dropped");
        sink.session_updated(self.id, handle, event).await;
    }

    pub async fn write(&self, handle: TransportHandle, written: u64, expected: u64) {
        self.emit(
            handle,
            TransportEvent::DidWriteData {
                bytes_written: written,
                total_bytes_written: written,
                total_bytes_expected_to_write: expected,
            },
        )
        .await;
    }

    /// Deliver a finished body followed by a successful completion
    pub async fn finish(&self, handle: TransportHandle, location: &Path) {
        self.emit(
            handle,
            TransportEvent::DidFinishDownloading {
                location: location.to_path_buf(),
            },
        )
        .await;
        self.emit(handle, TransportEvent::DidComplete { error: None }).await;
    }

    pub async fn fail(&self, handle: TransportHandle, error: PullmanError) {
        self.emit(handle, TransportEvent::DidComplete { error: Some(error) })
            .await;
    }

    fn track(&self, call: Call) -> TransportHandle {
        let handle = TransportHandle::new();
        self.calls.lock().push(call);
        self.handles.lock().push(handle);
        handle
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn start(&self, request: &Request) -> TransportHandle {
        self.track(Call::Start(request.source.to_string()))
    }

    fn resume_from_token(&self, token: &ResumeToken) -> TransportHandle {
        self.track(Call::Resume(token.as_bytes().to_vec()))
    }

    fn cancel(&self, handle: TransportHandle) {
        self.calls.lock().push(Call::Cancel(handle));
    }

    async fn cancel_producing_resume_token(&self, handle: TransportHandle) -> Option<ResumeToken> {
        self.calls.lock().push(Call::Pause(handle));
        self.pause_token.lock().clone()
    }
}

#[derive(Default)]
pub struct FakeFactory {
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.transports.lock()[index])
    }

    pub fn count(&self) -> usize {
        self.transports.lock().len()
    }
}

impl TransportFactory for FakeFactory {
    fn make_transport(
        &self,
        configuration: TransportConfiguration,
        sink: Weak<dyn EventSink>,
    ) -> Arc<dyn Transport> {
        let transport = Arc::new(FakeTransport {
            id: TransportId::new(),
            configuration,
            sink,
            calls: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            pause_token: Mutex::new(Some(ResumeToken::new(RESUME_DATA.to_vec()))),
        });
        self.transports.lock().push(Arc::clone(&transport));
        transport
    }
}

pub struct Harness {
    pub manager: Arc<Manager>,
    pub factory: Arc<FakeFactory>,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let scratch = TempDir::new().expect("Failed to create temp dir");
        let factory = Arc::new(FakeFactory::default());
        let config = ManagerConfig {
            scratch_dir: scratch.path().to_path_buf(),
            ..ManagerConfig::named("Test")
        };
        let fs = Arc::new(TokioFileSystem::new(scratch.path()));
        let manager = Manager::new(config, factory.clone(), fs);

        Self {
            manager,
            factory,
            scratch,
        }
    }

    /// Write a body file into scratch the way a transport would
    pub fn body(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.scratch.path().join(name);
        std::fs::write(&path, contents).expect("write body");
        path
    }
}

pub fn request(url: &str) -> Request {
    Request::parse(url).expect("valid url")
}
