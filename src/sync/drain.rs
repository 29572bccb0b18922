//! Connection draining. A graceful shutdown must wait until every client
//! connection that was accepted before the shutdown signal is done. Rather
//! than broadcasting the signal to every connection task and collecting
//! explicit acknowledgements, each task holds a [`Guard`] for as long as it
//! serves its socket, and [`Drain::wait`] resolves once every guard is gone.
//!
//! The whole mechanism is one [`mpsc`] channel on which nothing is ever
//! sent: guards are senders, dropping one is the acknowledgement, and the
//! channel reporting itself closed is the "all connections finished" event.
//! Tasks never have to check whether a shutdown is in progress, they only
//! have to outlive their socket.

use tokio::sync::mpsc;

/// Tracks how many connection tasks are still alive. Created together with
/// the listener, consumed by [`Drain::wait`] during shutdown.
pub(crate) struct Drain {
    /// Closed once every [`Guard`] is gone. Nothing is ever received on it.
    completions: mpsc::Receiver<()>,

    /// Prototype for [`Drain::guard`]. Dropped when the wait starts so that
    /// only guards held by connection tasks keep the channel open.
    guard: Guard,
}

/// Held by a connection task for as long as it serves its socket. Dropping
/// the guard is what signals completion, there is nothing to call.
#[derive(Clone)]
pub(crate) struct Guard {
    _completion: mpsc::Sender<()>,
}

impl Drain {
    pub fn new() -> Self {
        let (sender, completions) = mpsc::channel(1);

        Self {
            completions,
            guard: Guard {
                _completion: sender,
            },
        }
    }

    /// A new guard for one connection task.
    pub fn guard(&self) -> Guard {
        self.guard.clone()
    }

    /// Resolves once every outstanding [`Guard`] has been dropped.
    pub async fn wait(self) {
        let Self {
            mut completions,
            guard,
        } = self;

        // Our own prototype has to go first, otherwise the channel never
        // closes.
        drop(guard);

        // Nothing is ever sent, so `recv` resolves with `None` exactly when
        // the last guard is dropped.
        while completions.recv().await.is_some() {}
    }
}
