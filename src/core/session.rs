//! Live session bookkeeping.
//!
//! One entry per `sub_chat_id` across all providers, registered before the
//! subprocess spawns so a concurrent [`SessionRegistry::cancel`] always finds
//! it. A second `chat()` for an id that is still live supersedes the first:
//! the old session is cancelled and the new one takes the slot. Entries carry
//! a generation so the old session's cleanup cannot evict its successor.
//!
//! Cancelling only raises the session's abort signal. The driver that owns
//! the child reacts by terminating it, and it alone knows whether the child
//! has already been reaped, so a recycled pid is never signalled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

// =============================================================================
// Abort signalling
// =============================================================================

/// Requests cancellation of one session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// The receiving side of an [`AbortHandle`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// A connected handle/signal pair.
#[must_use]
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

impl AbortHandle {
    /// Request cancellation. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new receiver observing this handle.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl AbortSignal {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is requested. Never resolves if every handle is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Ask `pid` to exit with `SIGTERM`.
#[cfg(unix)]
pub fn send_terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and has no memory-safety
    // preconditions; a stale pid at worst yields ESRCH.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(pid, "SIGTERM not delivered");
    }
}

/// No graceful signal on this platform; the supervisor kills the child.
#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) {}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
struct SessionEntry {
    provider_id: String,
    abort: AbortHandle,
    pid: Option<u32>,
    generation: u64,
}

/// Snapshot of one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub sub_chat_id: String,
    pub provider_id: String,
    pub pid: Option<u32>,
}

/// Keyed registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SessionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Register a session and return its generation. A live session under
    /// the same id is cancelled first.
    pub fn register(&self, sub_chat_id: &str, provider_id: &str, abort: AbortHandle) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = SessionEntry {
            provider_id: provider_id.to_string(),
            abort,
            pid: None,
            generation,
        };
        let previous = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut map| map.insert(sub_chat_id.to_string(), entry));
        if let Some(old) = previous {
            tracing::info!(
                sub_chat_id,
                previous = %old.provider_id,
                provider = provider_id,
                "superseding live session"
            );
            old.abort.abort();
        }
        generation
    }

    /// Record the subprocess id once spawned, or clear it once reaped.
    pub fn set_pid(&self, sub_chat_id: &str, generation: u64, pid: Option<u32>) {
        if let Ok(mut map) = self.sessions.lock() {
            if let Some(entry) = map.get_mut(sub_chat_id) {
                if entry.generation == generation {
                    entry.pid = pid;
                }
            }
        }
    }

    /// Pid of the live subprocess for `sub_chat_id`, if one is running.
    #[must_use]
    pub fn pid(&self, sub_chat_id: &str) -> Option<u32> {
        self.sessions
            .lock()
            .ok()
            .and_then(|map| map.get(sub_chat_id).and_then(|e| e.pid))
    }

    /// Cancel and remove the session. Unknown ids are a no-op; returns
    /// whether a session was found.
    pub fn cancel(&self, sub_chat_id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut map| map.remove(sub_chat_id));
        match removed {
            Some(entry) => {
                tracing::info!(sub_chat_id, provider = %entry.provider_id, "cancelling session");
                entry.abort.abort();
                true
            }
            None => {
                tracing::debug!(sub_chat_id, "cancel for unknown session ignored");
                false
            }
        }
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub fn deregister(&self, sub_chat_id: &str, generation: u64) {
        if let Ok(mut map) = self.sessions.lock() {
            if map
                .get(sub_chat_id)
                .is_some_and(|e| e.generation == generation)
            {
                map.remove(sub_chat_id);
            }
        }
    }

    #[must_use]
    pub fn is_active(&self, sub_chat_id: &str) -> bool {
        self.sessions
            .lock()
            .is_ok_and(|map| map.contains_key(sub_chat_id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().map_or(0, |map| map.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live sessions, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<_> = self
            .sessions
            .lock()
            .map(|map| {
                map.iter()
                    .map(|(id, e)| SessionInfo {
                        sub_chat_id: id.clone(),
                        provider_id: e.provider_id.clone(),
                        pid: e.pid,
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.sub_chat_id.cmp(&b.sub_chat_id));
        out
    }
}

/// Deregisters its session when dropped, whatever path the driver took.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    sub_chat_id: String,
    generation: u64,
}

impl SessionGuard {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, sub_chat_id: &str, generation: u64) -> Self {
        Self {
            registry,
            sub_chat_id: sub_chat_id.to_string(),
            generation,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.sub_chat_id, self.generation);
    }
}
