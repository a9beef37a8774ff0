//! Process lifecycle: a cancellable root token and the background loops bound to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

struct TokenInner {
    cancelled: AtomicBool,
    // Dropped on cancel; every clone of `receiver` then becomes ready.
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Cancellable root context shared by every background loop.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

impl ShutdownToken {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Cancel the token. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            debug!("shutdown requested");
        }
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A receiver that disconnects once the token is cancelled, for use in `select!`.
    #[must_use]
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.inner.receiver
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owns the root token and the join handles of registered background loops.
pub struct Lifecycle {
    token: ShutdownToken,
    loops: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: ShutdownToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn token(&self) -> &ShutdownToken {
        &self.token
    }

    /// Register an already-running loop so `shutdown` waits for it.
    pub fn register(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.into(), handle));
    }

    /// Cancel the root token and join every registered loop.
    pub fn shutdown(&self) {
        self.token.cancel();
        let loops = std::mem::take(&mut *self.loops.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, handle) in loops {
            if handle.join().is_err() {
                warn!(loop_name = %name, "background loop panicked");
            }
        }
        info!("lifecycle shut down");
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
