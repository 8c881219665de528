//! Download Manager - categorises requests into sessions
//!
//! This is the top-level coordinator that:
//! - Maps each request to a session kind and caches one session per kind
//! - Fans cancel/pause/resume out to every session
//! - Receives transport events and routes them to the owning session

use crate::config::ManagerConfig;
use crate::engine::{EventHandler, Session, Task};
use crate::error::PullmanError;
use crate::fs::{FileSystem, TokioFileSystem};
use crate::ids::TaskIdAllocator;
use crate::transport::{
    EventSink, HttpTransportFactory, TransportConfiguration, TransportEvent, TransportFactory,
    TransportHandle, TransportId,
};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use pullman_types::{BackgroundSession, Request, SessionKind};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{error, info, trace};

/// Download manager.
///
/// Sessions and manager are many to one; a manager lives behind an `Arc`
/// so its transports can hold a weak reference back to it.
pub struct Manager {
    config: ManagerConfig,
    background: BackgroundSession,
    transports: Arc<dyn TransportFactory>,
    fs: Arc<dyn FileSystem>,
    ids: Arc<TaskIdAllocator>,
    /// Sessions categorised by kind
    sessions: Mutex<HashMap<SessionKind, Arc<Session>>>,
    this: Weak<Manager>,
}

impl Manager {
    /// Create a manager with its own task id allocator
    pub fn new(
        config: ManagerConfig,
        transports: Arc<dyn TransportFactory>,
        fs: Arc<dyn FileSystem>,
    ) -> Arc<Self> {
        Self::with_ids(config, transports, fs, Arc::new(TaskIdAllocator::new()))
    }

    /// Create a manager sharing `ids` with other components
    pub fn with_ids(
        config: ManagerConfig,
        transports: Arc<dyn TransportFactory>,
        fs: Arc<dyn FileSystem>,
        ids: Arc<TaskIdAllocator>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            background: config.background_session(),
            config,
            transports,
            fs,
            ids,
            sessions: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Manager wired to the HTTP transport and the local filesystem
    pub fn http(config: ManagerConfig) -> Result<Arc<Self>, PullmanError> {
        let transports = Arc::new(HttpTransportFactory::new(&config)?);
        let fs = Arc::new(TokioFileSystem::new(config.scratch_dir.clone()));
        Ok(Self::new(config, transports, fs))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register a request for download.
    ///
    /// Returns the task for the request; registering the same identifier on
    /// the same session kind again returns the cached task.
    pub fn register(&self, request: Request, on_event: Option<EventHandler>) -> Arc<Task> {
        trace!(manager = %self.config.name, request = %request.identifier, "registering request");

        let kind = request.session_kind(&self.background);

        let session = {
            let mut sessions = self.sessions.lock();
            match sessions.entry(kind) {
                Entry::Occupied(entry) => {
                    trace!(manager = %self.config.name, kind = %entry.key(), "retrieving session from cache");
                    Arc::clone(entry.get())
                }
                Entry::Vacant(entry) => {
                    info!(manager = %self.config.name, kind = %entry.key(), "creating new session");
                    let configuration = TransportConfiguration::for_request(entry.key().clone(), &request);
                    let sink: Weak<dyn EventSink> = self.this.clone();
                    let transport = self.transports.make_transport(configuration, sink);
                    let session = Arc::new(Session::new(
                        entry.key().clone(),
                        transport,
                        Arc::clone(&self.fs),
                        Arc::clone(&self.ids),
                    ));
                    Arc::clone(entry.insert(session))
                }
            }
        };

        session.enqueue(request, on_event)
    }

    /// Drop the cached task for `request`, canceling it if still running
    pub fn remove(&self, request: &Request) -> Option<Arc<Task>> {
        let kind = request.session_kind(&self.background);
        let session = self.sessions.lock().get(&kind).cloned()?;
        session.remove(&request.identifier)
    }

    /// Drop canceled and failed tasks from every session
    pub fn evict_terminal(&self) -> usize {
        self.sessions().iter().map(|session| session.evict_terminal()).sum()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Every cached task across sessions
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.sessions()
            .iter()
            .flat_map(|session| session.tasks())
            .collect()
    }

    pub fn cancel_all(&self) {
        trace!(manager = %self.config.name, "trying to cancel downloads");

        for session in self.sessions() {
            session.cancel_all();
        }
    }

    pub async fn pause_all(&self) {
        trace!(manager = %self.config.name, "trying to pause downloads");

        let sessions = self.sessions();
        join_all(sessions.iter().map(|session| session.pause_all())).await;
    }

    pub fn resume_all(&self) {
        trace!(manager = %self.config.name, "trying to resume downloads");

        for session in self.sessions() {
            session.resume_all();
        }
    }
}

#[async_trait]
impl EventSink for Manager {
    async fn session_updated(
        &self,
        transport: TransportId,
        handle: TransportHandle,
        event: TransportEvent,
    ) {
        let session = self
            .sessions()
            .into_iter()
            .find(|session| session.transport_id() == transport);

        let Some(session) = session else {
            error!(
                manager = %self.config.name,
                %transport,
                event = event.name(),
                "session updated without having it in cache"
            );
            return;
        };

        trace!(manager = %self.config.name, session = %session, event = event.name(), "session updated");
        session.task_updated(handle, event).await;
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("name", &self.config.name)
            .field("sessions", &self.session_count())
            .finish()
    }
}
