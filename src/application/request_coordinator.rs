// Request coordinator - one async request per change of a watched value
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::dataset_repository::FetchError;

pub type RequestFuture<T> = BoxFuture<'static, Result<T, FetchError>>;

type Callback<V> = Box<dyn Fn(&V) + Send + Sync>;

/// Cooperative cancellation for an issued request. Invoking it does not
/// guarantee the response never arrives.
pub struct CancelHandle(Box<dyn FnOnce() + Send>);

impl CancelHandle {
    fn invoke(self) {
        (self.0)()
    }
}

/// Handed to the issuing function so it can leave a cancel handle behind.
#[derive(Default)]
pub struct CancelSlot {
    handle: Option<CancelHandle>,
}

impl CancelSlot {
    pub fn register(&mut self, cancel: impl FnOnce() + Send + 'static) {
        self.handle = Some(CancelHandle(Box::new(cancel)));
    }
}

/// Visible state of a coordinator. `response` and `error` belong to the
/// latest settled request; a failure keeps the last good response.
#[derive(Debug, Clone)]
pub struct RequestState<T> {
    pub sequence: u64,
    pub pending: bool,
    pub response: Option<T>,
    pub error: Option<FetchError>,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self {
            sequence: 0,
            pending: false,
            response: None,
            error: None,
        }
    }
}

/// Handle on an issued request.
pub struct RequestTicket {
    pub sequence: u64,
    task: JoinHandle<()>,
}

impl RequestTicket {
    /// Waits until the response has been applied or discarded.
    #[cfg(test)]
    pub async fn settled(self) {
        let _ = self.task.await;
    }
}

impl std::fmt::Debug for RequestTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTicket")
            .field("sequence", &self.sequence)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

struct Inner<D> {
    sequence: u64,
    watched: Option<D>,
    cancel: Option<CancelHandle>,
    torn_down: bool,
}

struct Shared<D, T> {
    name: &'static str,
    inner: Mutex<Inner<D>>,
    state: watch::Sender<RequestState<T>>,
    on_resolve: Option<Callback<T>>,
    on_reject: Option<Callback<FetchError>>,
}

impl<D, T> Shared<D, T> {
    fn lock(&self) -> MutexGuard<'_, Inner<D>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn teardown(&self) {
        let cancel = {
            let mut inner = self.lock();
            inner.torn_down = true;
            inner.cancel.take()
        };
        if let Some(cancel) = cancel {
            tracing::debug!("Cancelling {} request on teardown", self.name);
            cancel.invoke();
        }
    }

    /// Applies a result only if it answers the latest request. The check and
    /// the update happen under the same lock so a newer trigger cannot slip
    /// in between.
    fn settle(&self, sequence: u64, result: Result<T, FetchError>) {
        let inner = self.lock();
        if inner.torn_down || inner.sequence != sequence {
            tracing::debug!(
                "Discarding stale {} response #{} (latest #{})",
                self.name,
                sequence,
                inner.sequence
            );
            return;
        }

        match result {
            Ok(response) => {
                if let Some(on_resolve) = &self.on_resolve {
                    on_resolve(&response);
                }
                self.state.send_modify(|state| {
                    state.response = Some(response);
                    state.error = None;
                    state.pending = false;
                });
            }
            Err(error) => {
                tracing::warn!("{} request #{} failed: {}", self.name, sequence, error);
                if let Some(on_reject) = &self.on_reject {
                    on_reject(&error);
                }
                self.state.send_modify(|state| {
                    state.error = Some(error);
                    state.pending = false;
                });
            }
        }
    }
}

/// Issues one request per change of a watched dependency value and
/// exposes pending/response/error state.
///
/// Every request carries a sequence number; only the response to the most
/// recently issued request may touch the visible state. Superseded
/// requests get their cancel handle invoked, and whatever they still
/// deliver is dropped.
pub struct RequestCoordinator<D, T> {
    shared: Arc<Shared<D, T>>,
}

impl<D, T> RequestCoordinator<D, T>
where
    D: PartialEq + Send + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self::build(name, None, None)
    }

    /// Callbacks run on the task that settles the request, while the
    /// coordinator's lock is held; they must not call back into it.
    pub fn with_callbacks(
        name: &'static str,
        on_resolve: impl Fn(&T) + Send + Sync + 'static,
        on_reject: impl Fn(&FetchError) + Send + Sync + 'static,
    ) -> Self {
        Self::build(name, Some(Box::new(on_resolve)), Some(Box::new(on_reject)))
    }

    fn build(name: &'static str, on_resolve: Option<Callback<T>>, on_reject: Option<Callback<FetchError>>) -> Self {
        let (state, _) = watch::channel(RequestState::default());
        Self {
            shared: Arc::new(Shared {
                name,
                inner: Mutex::new(Inner {
                    sequence: 0,
                    watched: None,
                    cancel: None,
                    torn_down: false,
                }),
                state,
                on_resolve,
                on_reject,
            }),
        }
    }

    /// Reacts to the current value of the watched dependencies.
    ///
    /// Nothing happens when `deps` equals the previously watched value. On a
    /// change (or the first call) `needs_update` decides whether to fetch;
    /// if it does, the in-flight request is cancelled and `issue` starts a
    /// new one on the runtime.
    pub fn watch<F>(&self, deps: D, needs_update: impl FnOnce() -> bool, issue: F) -> Option<RequestTicket>
    where
        F: FnOnce(&mut CancelSlot) -> RequestFuture<T>,
    {
        let (sequence, superseded) = {
            let mut inner = self.shared.lock();
            if inner.torn_down || inner.watched.as_ref() == Some(&deps) {
                return None;
            }
            inner.watched = Some(deps);
            if !needs_update() {
                tracing::debug!("{} dependencies changed, no update needed", self.shared.name);
                return None;
            }
            inner.sequence += 1;
            let sequence = inner.sequence;
            // Published under the lock so a concurrent trigger or settle
            // cannot interleave with it.
            self.shared.state.send_modify(|state| {
                state.sequence = sequence;
                state.pending = true;
            });
            (sequence, inner.cancel.take())
        };

        if let Some(cancel) = superseded {
            tracing::debug!("Cancelling {} request superseded by #{}", self.shared.name, sequence);
            cancel.invoke();
        }

        let mut slot = CancelSlot::default();
        let request = issue(&mut slot);
        let orphaned = {
            let mut inner = self.shared.lock();
            if inner.sequence == sequence && !inner.torn_down {
                inner.cancel = slot.handle.take();
                None
            } else {
                slot.handle.take()
            }
        };
        if let Some(cancel) = orphaned {
            cancel.invoke();
        }

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let result = request.await;
            shared.settle(sequence, result);
        });

        Some(RequestTicket { sequence, task })
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
        self.shared.state.subscribe()
    }

    /// Cancels the in-flight request and ignores everything that arrives
    /// afterwards.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}

impl<D, T> RequestCoordinator<D, T>
where
    D: PartialEq + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn snapshot(&self) -> RequestState<T> {
        self.shared.state.borrow().clone()
    }
}

impl<D, T> Drop for RequestCoordinator<D, T> {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}
