//! Download task - state machine for a single request
//!
//! A task owns at most one transport handle at a time. Pausing gives the
//! handle back in exchange for a resume token, resuming obtains a new one;
//! the task identifier stays the same across those episodes.

use crate::engine::TaskState;
use crate::error::PullmanError;
use crate::fs::FileSystem;
use crate::ids::TaskId;
use crate::transport::{Transport, TransportEvent, TransportHandle};
use parking_lot::Mutex;
use pullman_types::{Destination, Progress, Request, ResumeToken};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Callback invoked after every state change of a task
pub type EventHandler = Arc<dyn Fn(&TaskId, &TaskState) + Send + Sync>;

/// A download task
pub struct Task {
    id: TaskId,
    request: Request,
    transport: Arc<dyn Transport>,
    fs: Arc<dyn FileSystem>,
    /// Transfer currently running for this task
    handle: Mutex<Option<TransportHandle>>,
    state: watch::Sender<TaskState>,
    on_event: Option<EventHandler>,
}

/// Serializable view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub source: String,
    pub state: &'static str,
    pub progress: Option<Progress>,
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        request: Request,
        transport: Arc<dyn Transport>,
        fs: Arc<dyn FileSystem>,
        on_event: Option<EventHandler>,
    ) -> Self {
        let (state, _) = watch::channel(TaskState::Queued(None));

        Self {
            id,
            request,
            transport,
            fs,
            handle: Mutex::new(None),
            state,
            on_event,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Wait until the task reaches a terminal state
    pub async fn wait_until_terminal(&self) -> TaskState {
        let mut receiver = self.state.subscribe();
        let state = match receiver.wait_for(TaskState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();

        TaskSnapshot {
            id: self.id.clone(),
            source: self.request.source.to_string(),
            state: state.name(),
            progress: state.progress(),
            path: state.path().map(Path::to_path_buf),
            error: state.error().map(|e| e.to_string()),
        }
    }

    /// Whether `handle` is the transfer currently running for this task
    pub(crate) fn owns(&self, handle: TransportHandle) -> bool {
        *self.handle.lock() == Some(handle)
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Start or continue the download.
    ///
    /// No-op unless the task is queued or suspended.
    pub fn resume(&self) {
        let mut previous = None;
        self.transition(|state| match state {
            TaskState::Queued(_) | TaskState::Suspended(_) => {
                previous = Some(std::mem::replace(state, TaskState::Downloading(Progress::ZERO)));
                true
            }
            _ => false,
        });

        let Some(previous) = previous else {
            trace!(task = %self.id, "resume ignored");
            return;
        };

        let token = match previous {
            TaskState::Queued(token) => token,
            TaskState::Suspended(token) => Some(token),
            _ => None,
        }
        .filter(|token| !token.is_empty());

        {
            let mut slot = self.handle.lock();
            let handle = match &token {
                Some(token) => {
                    info!(task = %self.id, "resuming download from token");
                    self.transport.resume_from_token(token)
                }
                None => {
                    info!(task = %self.id, url = %self.request.source, "starting download");
                    self.transport.start(&self.request)
                }
            };
            *slot = Some(handle);
        }

        // cancel() may have run between the transition and the handle being stored
        if self.state.borrow().is_terminal() {
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                debug!(task = %self.id, "canceling transfer started after cancel");
                self.transport.cancel(handle);
            }
        }
    }

    /// Pause the download, keeping resume data.
    ///
    /// Waits for the transport to produce a token. If none can be produced
    /// the transfer is canceled and the task fails.
    pub async fn pause(&self) {
        let queued = self.transition(|state| {
            if let TaskState::Queued(Some(token)) = state {
                let token = std::mem::replace(token, ResumeToken::new(Vec::new()));
                *state = TaskState::Suspended(token);
                true
            } else {
                false
            }
        });
        if queued {
            debug!(task = %self.id, "queued task suspended");
            return;
        }

        if !matches!(*self.state.borrow(), TaskState::Downloading(_)) {
            trace!(task = %self.id, "pause ignored");
            return;
        }

        let handle = *self.handle.lock();
        let Some(handle) = handle else {
            warn!(task = %self.id, "downloading task without a transfer");
            return;
        };

        let token = self
            .transport
            .cancel_producing_resume_token(handle)
            .await
            .filter(|token| !token.is_empty());

        {
            let mut slot = self.handle.lock();
            if *slot == Some(handle) {
                *slot = None;
            }
        }

        match token {
            Some(token) => {
                let suspended = self.transition(|state| match state {
                    TaskState::Downloading(_) => {
                        *state = TaskState::Suspended(token);
                        true
                    }
                    _ => false,
                });
                if suspended {
                    info!(task = %self.id, "download paused");
                }
            }
            None => {
                warn!(task = %self.id, "no resume data produced, canceling");
                self.transport.cancel(handle);
                self.transition(|state| match state {
                    TaskState::Downloading(_) => {
                        *state = TaskState::Failed(Arc::new(PullmanError::ResumeTokenUnavailable));
                        true
                    }
                    _ => false,
                });
            }
        }
    }

    /// Cancel the download. Terminal.
    pub fn cancel(&self) {
        let canceled = self.transition(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = TaskState::Canceled;
                true
            }
        });

        if !canceled {
            trace!(task = %self.id, "cancel ignored");
            return;
        }

        info!(task = %self.id, "download canceled");
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.transport.cancel(handle);
        }
    }

    // ========================================================================
    // Transport events
    // ========================================================================

    /// Apply a transport event. Returns `true` once the download has been
    /// finalized successfully.
    pub(crate) async fn handle_event(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::DidWriteData {
                total_bytes_written,
                total_bytes_expected_to_write,
                ..
            } => {
                self.update_progress(Progress::new(total_bytes_written, total_bytes_expected_to_write));
                false
            }
            TransportEvent::DidResumeAtOffset {
                file_offset,
                expected_total_bytes,
            } => {
                debug!(task = %self.id, offset = file_offset, "transfer resumed at offset");
                self.update_progress(Progress::new(file_offset, expected_total_bytes));
                false
            }
            TransportEvent::DidFinishDownloading { location } => {
                let temp_path = location.clone();
                let completed = self.transition(|state| match state {
                    TaskState::Downloading(_) => {
                        *state = TaskState::Completed { temp_path };
                        true
                    }
                    _ => false,
                });

                if !completed {
                    warn!(task = %self.id, state = %self.state(), "finish for a task that is not downloading");
                    return false;
                }

                self.finalize(&location).await
            }
            TransportEvent::DidComplete { error: None } => {
                trace!(task = %self.id, "transfer completed");
                false
            }
            TransportEvent::DidComplete { error: Some(error) } => {
                if error.is_cancellation() {
                    debug!(task = %self.id, "transfer cancellation acknowledged");
                    return false;
                }

                let error = Arc::new(error);
                let failed = self.transition(|state| {
                    if state.is_terminal() {
                        false
                    } else {
                        *state = TaskState::Failed(Arc::clone(&error));
                        true
                    }
                });

                if failed {
                    error!(task = %self.id, error = %error, "download failed");
                    self.handle.lock().take();
                } else {
                    warn!(task = %self.id, error = %error, "error for a task that already ended");
                }
                false
            }
        }
    }

    fn update_progress(&self, progress: Progress) {
        let updated = self.transition(|state| match state {
            TaskState::Downloading(current) => {
                *current = progress;
                true
            }
            _ => false,
        });

        if !updated {
            warn!(task = %self.id, state = %self.state(), "progress for a task that is not downloading");
        }
    }

    /// Move the received body into place
    async fn finalize(&self, temp_path: &Path) -> bool {
        let placed = match &self.request.destination {
            // nowhere to move it, the transport's file is the result
            None => Ok(temp_path.to_path_buf()),
            Some(destination) => self.place(destination, temp_path).await,
        };

        let result = match placed {
            Ok(final_path) => {
                let path = final_path.clone();
                let finished = self.transition(|state| match state {
                    TaskState::Completed { .. } => {
                        *state = TaskState::Finished { final_path: path };
                        true
                    }
                    _ => false,
                });
                if finished {
                    info!(task = %self.id, path = %final_path.display(), "download finished");
                }
                finished
            }
            Err(e) => {
                error!(task = %self.id, error = %e, "failed to move download into place");
                let error = Arc::new(PullmanError::Io(e));
                self.transition(|state| match state {
                    TaskState::Completed { .. } => {
                        *state = TaskState::Failed(error);
                        true
                    }
                    _ => false,
                });
                false
            }
        };

        self.handle.lock().take();
        result
    }

    async fn place(&self, destination: &Destination, temp_path: &Path) -> std::io::Result<PathBuf> {
        let file_name = destination
            .file_name
            .clone()
            .unwrap_or_else(|| file_name_from_url(&self.request.source));

        let mut directory = if destination.path.as_os_str().is_empty() {
            self.fs.scratch_directory()
        } else {
            destination.path.clone()
        };

        if self.fs.file_exists(&directory).await != Some(true) {
            if let Err(e) = self.fs.create_directory(&directory, true).await {
                warn!(
                    task = %self.id,
                    directory = %directory.display(),
                    error = %e,
                    "cannot create destination, using scratch directory"
                );
                directory = self.fs.scratch_directory();
                if self.fs.file_exists(&directory).await != Some(true) {
                    self.fs.create_directory(&directory, true).await?;
                }
            }
        }

        let target = directory.join(file_name);
        match self.fs.file_exists(&target).await {
            Some(true) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("a directory already exists at {}", target.display()),
                ));
            }
            Some(false) => {
                debug!(task = %self.id, path = %target.display(), "replacing existing file");
                self.fs.remove_item(&target).await?;
            }
            None => {}
        }

        self.fs.move_item(temp_path, &target).await?;
        Ok(target)
    }

    /// Apply `modify` to the state; on change notify subscribers and the handler
    fn transition(&self, modify: impl FnOnce(&mut TaskState) -> bool) -> bool {
        let mut changed_to = None;
        let changed = self.state.send_if_modified(|state| {
            let changed = modify(state);
            if changed {
                changed_to = Some(state.clone());
            }
            changed
        });

        if let Some(state) = changed_to {
            trace!(task = %self.id, state = %state, "state changed");
            if let Some(on_event) = &self.on_event {
                on_event(&self.id, &state);
            }
        }

        changed
    }
}

/// Last path segment of `url`, percent-decoded, never containing separators
pub(crate) fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .map(|name| name.replace(['/', '\\'], "_"))
        .filter(|name| name != "." && name != "..")
        .unwrap_or_else(|| "download".to_string())
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("source", &self.request.source.as_str())
            .field("state", &*self.state.borrow())
            .finish()
    }
}
