//! Request-id supersession for preview side requests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ExportError, ExportResult};

type Reply<T> = oneshot::Sender<ExportResult<T>>;

/// Holds at most one pending request; a newer one rejects the older
pub struct PreviewGate<T> {
    next_id: AtomicU64,
    pending: Mutex<Option<(u64, Reply<T>)>>,
}

impl<T> Default for PreviewGate<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(None),
        }
    }
}

impl<T> PreviewGate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new request id; any older pending request fails with `Superseded`
    pub fn begin(&self) -> (u64, oneshot::Receiver<ExportResult<T>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();

        let previous = match self.pending.lock() {
            Ok(mut pending) => pending.replace((id, tx)),
            Err(_) => None,
        };
        if let Some((old_id, old_tx)) = previous {
            debug!("Preview request {} superseded by {}", old_id, id);
            let _ = old_tx.send(Err(ExportError::Superseded { request_id: old_id }));
        }
        (id, rx)
    }

    /// Id of the request still waiting for a reply
    pub fn current(&self) -> Option<u64> {
        self.pending
            .lock()
            .ok()
            .and_then(|pending| pending.as_ref().map(|(id, _)| *id))
    }

    /// Deliver a result; replies to anything but the current id are dropped
    pub fn complete(&self, id: u64, value: T) -> bool {
        self.resolve(id, Ok(value))
    }

    pub fn fail(&self, id: u64, error: ExportError) -> bool {
        self.resolve(id, Err(error))
    }

    /// Fail whatever is pending, regardless of id
    pub fn abandon(&self, error: ExportError) {
        let pending = self.pending.lock().ok().and_then(|mut pending| pending.take());
        if let Some((id, tx)) = pending {
            debug!("Preview request {} abandoned", id);
            let _ = tx.send(Err(error));
        }
    }

    fn resolve(&self, id: u64, result: ExportResult<T>) -> bool {
        let reply = match self.pending.lock() {
            Ok(mut pending) => match pending.take() {
                Some((current, tx)) if current == id => Some(tx),
                other => {
                    *pending = other;
                    None
                }
            },
            Err(_) => None,
        };

        match reply {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                debug!("Dropping stale preview reply {}", id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_newer_request_rejects_older() {
        let gate = PreviewGate::<u32>::new();
        let (first, first_rx) = gate.begin();
        let (second, second_rx) = gate.begin();
        assert!(second > first);

        match first_rx.await.unwrap() {
            Err(ExportError::Superseded { request_id }) => assert_eq!(request_id, first),
            other => panic!("unexpected {:?}", other),
        }

        assert!(!gate.complete(first, 1));
        assert!(gate.complete(second, 2));
        assert_eq!(second_rx.await.unwrap().unwrap(), 2);
        assert_eq!(gate.current(), None);
    }

    #[tokio::test]
    async fn test_fail_and_abandon() {
        let gate = PreviewGate::<u32>::new();
        let (id, rx) = gate.begin();
        assert!(gate.fail(id, ExportError::backend("no track")));
        assert!(rx.await.unwrap().is_err());

        let (_, rx) = gate.begin();
        gate.abandon(ExportError::ContextClosed);
        assert!(matches!(rx.await.unwrap(), Err(ExportError::ContextClosed)));
    }
}
