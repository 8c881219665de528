//! HTTP transport backed by reqwest
//!
//! Every transfer is a spawned tokio task streaming the response body into
//! a `.part` file in the scratch directory. Resume tokens record the part
//! file and offset and are only produced when the server accepts byte
//! ranges.

use super::{
    EventSink, Transport, TransportConfiguration, TransportEvent, TransportFactory,
    TransportHandle, TransportId,
};
use crate::config::ManagerConfig;
use crate::error::PullmanError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use pullman_types::{Request, ResumeToken};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Builds [`HttpTransport`]s sharing two reqwest clients
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    /// Gives up connecting after the configured connect timeout
    eager: Client,
    /// Keeps waiting for a connection
    patient: Client,
    scratch_dir: PathBuf,
    request_timeout: Option<Duration>,
    background_timeout: Option<Duration>,
}

impl HttpTransportFactory {
    pub fn new(config: &ManagerConfig) -> Result<Self, PullmanError> {
        let eager = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .build()?;

        let patient = Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            eager,
            patient,
            scratch_dir: config.scratch_dir.clone(),
            request_timeout: config.request_timeout(false),
            background_timeout: config.request_timeout(true),
        })
    }
}

impl TransportFactory for HttpTransportFactory {
    fn make_transport(
        &self,
        configuration: TransportConfiguration,
        sink: Weak<dyn EventSink>,
    ) -> Arc<dyn Transport> {
        let client = if configuration.waits_for_connectivity {
            self.patient.clone()
        } else {
            self.eager.clone()
        };

        let request_timeout = if configuration.kind.is_background() {
            self.background_timeout
        } else {
            self.request_timeout
        };

        if !configuration.allows_cellular_access {
            debug!(kind = %configuration.kind, "cellular restriction has no effect on this transport");
        }

        Arc::new(HttpTransport {
            id: TransportId::new(),
            configuration,
            client,
            request_timeout,
            scratch_dir: self.scratch_dir.clone(),
            sink,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// Transport running transfers over HTTP(S)
pub struct HttpTransport {
    id: TransportId,
    configuration: TransportConfiguration,
    client: Client,
    request_timeout: Option<Duration>,
    scratch_dir: PathBuf,
    sink: Weak<dyn EventSink>,
    jobs: Arc<Mutex<HashMap<TransportHandle, Job>>>,
}

/// Control side of a running transfer
struct Job {
    cancel: CancellationToken,
    suspend: Arc<AtomicBool>,
    checkpoint: Arc<Mutex<Checkpoint>>,
    task: JoinHandle<()>,
}

/// Contents of a resume token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResumeData {
    url: Url,
    part_path: PathBuf,
    offset: u64,
    expected: u64,
    /// Strong ETag or Last-Modified value, sent as If-Range
    validator: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Checkpoint {
    /// Server accepts byte ranges and the part file is intact
    resumable: bool,
    data: Option<ResumeData>,
}

impl HttpTransport {
    pub fn configuration(&self) -> &TransportConfiguration {
        &self.configuration
    }

    /// Number of transfers currently running
    pub fn active_transfers(&self) -> usize {
        self.jobs.lock().len()
    }

    fn spawn(&self, checkpoint: Checkpoint, failure: Option<PullmanError>) -> TransportHandle {
        let handle = TransportHandle::new();
        let job = TransferJob {
            transport: self.id,
            handle,
            client: self.client.clone(),
            request_timeout: self.request_timeout,
            sink: self.sink.clone(),
            jobs: Arc::clone(&self.jobs),
            cancel: CancellationToken::new(),
            suspend: Arc::new(AtomicBool::new(false)),
            checkpoint: Arc::new(Mutex::new(checkpoint)),
        };

        // hold the map while spawning so the job cannot finish before it is listed
        let mut jobs = self.jobs.lock();
        let control = Job {
            cancel: job.cancel.clone(),
            suspend: Arc::clone(&job.suspend),
            checkpoint: Arc::clone(&job.checkpoint),
            task: tokio::spawn(job.run(failure)),
        };
        jobs.insert(handle, control);

        handle
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn start(&self, request: &Request) -> TransportHandle {
        let part_path = self.scratch_dir.join(format!("{}.part", Uuid::new_v4()));
        let checkpoint = Checkpoint {
            resumable: false,
            data: Some(ResumeData {
                url: request.source.clone(),
                part_path,
                offset: 0,
                expected: 0,
                validator: None,
            }),
        };

        self.spawn(checkpoint, None)
    }

    fn resume_from_token(&self, token: &ResumeToken) -> TransportHandle {
        match serde_json::from_slice::<ResumeData>(token.as_bytes()) {
            Ok(data) => self.spawn(
                Checkpoint {
                    resumable: true,
                    data: Some(data),
                },
                None,
            ),
            Err(e) => {
                warn!(transport = %self.id, error = %e, "unreadable resume token");
                self.spawn(
                    Checkpoint::default(),
                    Some(PullmanError::InvalidResumeToken(e.to_string())),
                )
            }
        }
    }

    fn cancel(&self, handle: TransportHandle) {
        let job = self.jobs.lock().remove(&handle);
        if let Some(job) = job {
            debug!(transport = %self.id, %handle, "canceling transfer");
            job.cancel.cancel();
        }
    }

    async fn cancel_producing_resume_token(&self, handle: TransportHandle) -> Option<ResumeToken> {
        let job = self.jobs.lock().remove(&handle)?;

        job.suspend.store(true, Ordering::Release);
        job.cancel.cancel();

        if let Err(e) = job.task.await {
            warn!(transport = %self.id, %handle, error = %e, "transfer task ended abnormally");
            return None;
        }

        let checkpoint = job.checkpoint.lock().clone();
        if !checkpoint.resumable {
            debug!(transport = %self.id, %handle, "transfer cannot be resumed");
            return None;
        }

        let data = checkpoint.data?;
        match serde_json::to_vec(&data) {
            Ok(bytes) => Some(ResumeToken::new(bytes)),
            Err(e) => {
                warn!(transport = %self.id, error = %e, "failed to encode resume token");
                None
            }
        }
    }
}

/// Worker side of a running transfer
struct TransferJob {
    transport: TransportId,
    handle: TransportHandle,
    client: Client,
    request_timeout: Option<Duration>,
    sink: Weak<dyn EventSink>,
    jobs: Arc<Mutex<HashMap<TransportHandle, Job>>>,
    cancel: CancellationToken,
    suspend: Arc<AtomicBool>,
    checkpoint: Arc<Mutex<Checkpoint>>,
}

impl TransferJob {
    async fn run(self, failure: Option<PullmanError>) {
        let result = match failure {
            Some(error) => Err(error),
            None => self.download().await,
        };

        match result {
            Ok(location) => {
                info!(handle = %self.handle, path = %location.display(), "transfer finished");
                self.emit(TransportEvent::DidFinishDownloading { location }).await;
                self.emit(TransportEvent::DidComplete { error: None }).await;
            }
            Err(error) => {
                let suspending = error.is_cancellation() && self.suspend.load(Ordering::Acquire);
                let keep_part = {
                    let mut checkpoint = self.checkpoint.lock();
                    if !suspending {
                        checkpoint.resumable = false;
                    }
                    checkpoint.resumable
                };
                if !keep_part {
                    self.discard_part_file().await;
                }
                debug!(handle = %self.handle, error = %error, "transfer stopped");
                self.emit(TransportEvent::DidComplete { error: Some(error) }).await;
            }
        }

        self.jobs.lock().remove(&self.handle);
    }

    async fn download(&self) -> Result<PathBuf, PullmanError> {
        let data = self.checkpoint.lock().data.clone();
        let Some(data) = data else {
            return Err(PullmanError::InvalidResumeToken("missing transfer data".to_string()));
        };

        if let Some(parent) = data.part_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut request = self.client.get(data.url.clone());
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        if data.offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", data.offset));
            if let Some(validator) = &data.validator {
                request = request.header(header::IF_RANGE, validator.as_str());
            }
        }

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PullmanError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(PullmanError::Server {
                status: status.as_u16(),
            });
        }

        let resumed = data.offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        let start = if resumed { data.offset } else { 0 };
        let expected = response
            .content_length()
            .map(|length| length + start)
            .unwrap_or(0);

        let headers = response.headers();
        let accepts_ranges = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let validator = headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .filter(|etag| !etag.starts_with("W/"))
            .or_else(|| headers.get(header::LAST_MODIFIED).and_then(|v| v.to_str().ok()))
            .map(str::to_string);

        let mut file = if resumed {
            let file = OpenOptions::new().append(true).open(&data.part_path).await?;
            file.set_len(start).await?;
            file
        } else {
            File::create(&data.part_path).await?
        };

        {
            let mut checkpoint = self.checkpoint.lock();
            checkpoint.resumable = accepts_ranges || resumed;
            if let Some(current) = checkpoint.data.as_mut() {
                current.offset = start;
                current.expected = expected;
                if validator.is_some() {
                    current.validator = validator;
                }
            }
        }

        if data.offset > 0 {
            if !resumed {
                debug!(handle = %self.handle, "server ignored range, restarting from zero");
            }
            self.emit(TransportEvent::DidResumeAtOffset {
                file_offset: start,
                expected_total_bytes: expected,
            })
            .await;
        }

        let mut written = start;
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    file.flush().await?;
                    return Err(PullmanError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            {
                let mut checkpoint = self.checkpoint.lock();
                if let Some(current) = checkpoint.data.as_mut() {
                    current.offset = written;
                }
            }

            self.emit(TransportEvent::DidWriteData {
                bytes_written: chunk.len() as u64,
                total_bytes_written: written,
                total_bytes_expected_to_write: expected,
            })
            .await;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(data.part_path)
    }

    async fn discard_part_file(&self) {
        let path = self
            .checkpoint
            .lock()
            .data
            .as_ref()
            .map(|data| data.part_path.clone());

        if let Some(path) = path {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove partial file");
                }
            }
        }
    }

    async fn emit(&self, event: TransportEvent) {
        match self.sink.upgrade() {
            Some(sink) => sink.session_updated(self.transport, self.handle, event).await,
            None => debug!(handle = %self.handle, event = event.name(), "event sink gone, dropping event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullman_types::SessionKind;
    use tokio::sync::Notify;
    use wiremock::matchers::{header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TransportEvent>>,
        done: Notify,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn session_updated(
            &self,
            _transport: TransportId,
            _handle: TransportHandle,
            event: TransportEvent,
        ) {
            let done = matches!(event, TransportEvent::DidComplete { .. });
            self.events.lock().push(event);
            if done {
                self.done.notify_one();
            }
        }
    }

    impl RecordingSink {
        async fn wait(&self) {
            tokio::time::timeout(Duration::from_secs(10), self.done.notified())
                .await
                .expect("transfer did not complete");
        }
    }

    fn transport(scratch: &std::path::Path, sink: &Arc<RecordingSink>) -> Arc<dyn Transport> {
        let config = ManagerConfig {
            scratch_dir: scratch.to_path_buf(),
            ..ManagerConfig::default()
        };
        let factory = HttpTransportFactory::new(&config).unwrap();
        let sink: Arc<dyn EventSink> = sink.clone();
        let configuration = TransportConfiguration {
            kind: SessionKind::Foreground { is_ephemeral: true },
            allows_cellular_access: true,
            waits_for_connectivity: false,
        };
        factory.make_transport(configuration, Arc::downgrade(&sink))
    }

    fn token(data: &ResumeData) -> ResumeToken {
        ResumeToken::new(serde_json::to_vec(data).unwrap())
    }

    #[tokio::test]
    async fn test_fresh_download_reports_progress_and_finishes() {
        let server = MockServer::start().await;
        let body = vec![7u8; 10_000];
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("accept-ranges", "bytes")
                    .set_body_bytes(body.clone()),
            )
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);
        let request = Request::parse(&format!("{}/file.bin", server.uri())).unwrap();

        transport.start(&request);
        sink.wait().await;

        let events = sink.events.lock();
        let last_write = events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::DidWriteData {
                    total_bytes_written,
                    total_bytes_expected_to_write,
                    ..
                } => Some((*total_bytes_written, *total_bytes_expected_to_write)),
                _ => None,
            })
            .last();
        assert_eq!(last_write, Some((10_000, 10_000)));

        let location = events
            .iter()
            .find_map(|event| match event {
                TransportEvent::DidFinishDownloading { location } => Some(location.clone()),
                _ => None,
            })
            .expect("finish event");
        assert_eq!(std::fs::read(&location).unwrap(), body);
        assert!(matches!(
            events.last(),
            Some(TransportEvent::DidComplete { error: None })
        ));
    }

    #[tokio::test]
    async fn test_http_error_completes_with_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);
        let request = Request::parse(&format!("{}/missing", server.uri())).unwrap();

        transport.start(&request);
        sink.wait().await;

        let events = sink.events.lock();
        assert!(matches!(
            events.last(),
            Some(TransportEvent::DidComplete {
                error: Some(PullmanError::Server { status: 404 })
            })
        ));
        // no partial file left behind
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_resume_appends_to_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.txt"))
            .and(header_is("range", "bytes=4-"))
            .respond_with(ResponseTemplate::new(206).set_body_string("456789"))
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let part_path = scratch.path().join("resume.part");
        std::fs::write(&part_path, "0123").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);
        let data = ResumeData {
            url: Url::parse(&format!("{}/file.txt", server.uri())).unwrap(),
            part_path: part_path.clone(),
            offset: 4,
            expected: 10,
            validator: None,
        };

        transport.resume_from_token(&token(&data));
        sink.wait().await;

        let events = sink.events.lock();
        assert!(matches!(
            events.first(),
            Some(TransportEvent::DidResumeAtOffset {
                file_offset: 4,
                expected_total_bytes: 10
            })
        ));
        assert_eq!(std::fs::read_to_string(&part_path).unwrap(), "0123456789");
    }

    #[tokio::test]
    async fn test_resume_restarts_when_range_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("abcdefghij"))
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let part_path = scratch.path().join("stale.part");
        std::fs::write(&part_path, "0123").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);
        let data = ResumeData {
            url: Url::parse(&format!("{}/file.txt", server.uri())).unwrap(),
            part_path: part_path.clone(),
            offset: 4,
            expected: 10,
            validator: Some("\"v1\"".to_string()),
        };

        transport.resume_from_token(&token(&data));
        sink.wait().await;

        let events = sink.events.lock();
        assert!(matches!(
            events.first(),
            Some(TransportEvent::DidResumeAtOffset {
                file_offset: 0,
                expected_total_bytes: 10
            })
        ));
        assert_eq!(std::fs::read_to_string(&part_path).unwrap(), "abcdefghij");
    }

    #[tokio::test]
    async fn test_unreadable_token_fails_transfer() {
        let scratch = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);

        transport.resume_from_token(&ResumeToken::new(b"garbage".to_vec()));
        sink.wait().await;

        let events = sink.events.lock();
        assert!(matches!(
            events.last(),
            Some(TransportEvent::DidComplete {
                error: Some(PullmanError::InvalidResumeToken(_))
            })
        ));
    }

    #[tokio::test]
    async fn test_pause_before_response_produces_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);
        let request = Request::parse(&format!("{}/slow", server.uri())).unwrap();

        let handle = transport.start(&request);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let token = transport.cancel_producing_resume_token(handle).await;
        assert!(token.is_none());

        let events = sink.events.lock();
        assert!(matches!(
            events.last(),
            Some(TransportEvent::DidComplete {
                error: Some(PullmanError::Cancelled)
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_handle_is_noop() {
        let scratch = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let transport = transport(scratch.path(), &sink);

        transport.cancel(TransportHandle::new());
        assert!(transport
            .cancel_producing_resume_token(TransportHandle::new())
            .await
            .is_none());
        assert!(sink.events.lock().is_empty());
    }
}
