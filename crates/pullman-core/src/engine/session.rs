//! Session - one transport plus the tasks running on it
//!
//! Tasks are cached by request identifier so concurrent requests for the
//! same resource share a single task. The map lock only guards lookups,
//! inserts and snapshots; fan-out and event handling run on snapshots.

use crate::engine::{EventHandler, Task};
use crate::fs::FileSystem;
use crate::ids::TaskIdAllocator;
use crate::transport::{Transport, TransportEvent, TransportHandle, TransportId};
use futures::future::join_all;
use parking_lot::Mutex;
use pullman_types::{Request, SessionKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A transport session and its task cache
pub struct Session {
    kind: SessionKind,
    transport: Arc<dyn Transport>,
    fs: Arc<dyn FileSystem>,
    ids: Arc<TaskIdAllocator>,
    /// Tasks keyed by request identifier
    tasks: Mutex<HashMap<String, Arc<Task>>>,
}

impl Session {
    pub fn new(
        kind: SessionKind,
        transport: Arc<dyn Transport>,
        fs: Arc<dyn FileSystem>,
        ids: Arc<TaskIdAllocator>,
    ) -> Self {
        Self {
            kind,
            transport,
            fs,
            ids,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &SessionKind {
        &self.kind
    }

    pub fn transport_id(&self) -> TransportId {
        self.transport.id()
    }

    /// Get or create the task for `request` and make sure it is running.
    ///
    /// A cached task is resumed (a no-op unless it is queued or suspended)
    /// and `on_event` is ignored for it.
    pub fn enqueue(&self, request: Request, on_event: Option<EventHandler>) -> Arc<Task> {
        let task = {
            let mut tasks = self.tasks.lock();
            match tasks.get(&request.identifier) {
                Some(cached) => {
                    trace!(session = %self, task = %cached.id(), "retrieving task from cache");
                    Arc::clone(cached)
                }
                None => {
                    let id = self.ids.allocate(&request.identifier);
                    debug!(session = %self, task = %id, "creating task");
                    let key = request.identifier.clone();
                    let task = Arc::new(Task::new(
                        id,
                        request,
                        Arc::clone(&self.transport),
                        Arc::clone(&self.fs),
                        on_event,
                    ));
                    tasks.insert(key, Arc::clone(&task));
                    task
                }
            }
        };

        task.resume();
        task
    }

    /// Task cached for a request identifier
    pub fn task(&self, identifier: &str) -> Option<Arc<Task>> {
        self.tasks.lock().get(identifier).cloned()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Drop a task from the cache. A task that is still running is
    /// canceled first.
    pub fn remove(&self, identifier: &str) -> Option<Arc<Task>> {
        let task = self.tasks.lock().remove(identifier)?;
        if !task.state().is_terminal() {
            task.cancel();
        }
        Some(task)
    }

    /// Drop canceled and failed tasks, returning how many were removed
    pub fn evict_terminal(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, task| !task.state().is_terminal());
        before - tasks.len()
    }

    /// Cancels all the cached tasks
    pub fn cancel_all(&self) {
        for task in self.tasks() {
            task.cancel();
        }
    }

    /// Pauses all the cached tasks
    pub async fn pause_all(&self) {
        let tasks = self.tasks();
        join_all(tasks.iter().map(|task| task.pause())).await;
    }

    /// Resumes the queued and suspended tasks
    pub fn resume_all(&self) {
        for task in self.tasks() {
            task.resume();
        }
    }

    /// Route a transport event to the task owning `handle`
    pub async fn task_updated(&self, handle: TransportHandle, event: TransportEvent) {
        let snapshot: Vec<(String, Arc<Task>)> = self
            .tasks
            .lock()
            .iter()
            .map(|(key, task)| (key.clone(), Arc::clone(task)))
            .collect();

        let Some((key, task)) = snapshot.into_iter().find(|(_, task)| task.owns(handle)) else {
            match event {
                TransportEvent::DidComplete { error } if error.as_ref().map_or(true, |e| e.is_cancellation()) => {
                    trace!(session = %self, %handle, "completion for a released transfer");
                }
                event => {
                    warn!(session = %self, %handle, event = event.name(), "event for a transfer without a task");
                }
            }
            return;
        };

        let finishing = matches!(event, TransportEvent::DidFinishDownloading { .. });
        let finished = task.handle_event(event).await;

        if finishing && finished {
            let mut tasks = self.tasks.lock();
            if tasks.get(&key).is_some_and(|cached| Arc::ptr_eq(cached, &task)) {
                tasks.remove(&key);
                debug!(session = %self, task = %task.id(), "finished task released");
            }
        }
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.transport.id() == other.transport.id() && self.kind == other.kind
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} session", self.kind)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("transport", &self.transport.id())
            .field("tasks", &self.len())
            .finish()
    }
}
