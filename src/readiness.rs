//! One-shot readiness flag. Startup flips it once everything is wired;
//! request paths await it instead of sleeping.

use std::time::Duration;
use tokio::sync::watch;

pub struct ReadinessHandle {
    tx: watch::Sender<bool>,
}

impl ReadinessHandle {
    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct Readiness {
    rx: watch::Receiver<bool>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum NotReady {
    TimedOut,
    /// The handle was dropped without ever marking ready.
    Abandoned,
}

impl Readiness {
    pub fn new() -> (ReadinessHandle, Readiness) {
        let (tx, rx) = watch::channel(false);
        (ReadinessHandle { tx }, Readiness { rx })
    }

    pub fn ready() -> Readiness {
        let (handle, readiness) = Self::new();
        handle.mark_ready();
        readiness
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self, timeout: Duration) -> Result<(), NotReady> {
        let mut rx = self.rx.clone();
        // the wait_for guard borrows rx and has to drop before it
        let outcome = match tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(NotReady::Abandoned),
            Err(_) => Err(NotReady::TimedOut),
        };
        outcome
    }
}
