use super::Backend;
use crate::models::{TermSize, TerminalId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
enum Outbound {
    Write(TerminalId, Vec<u8>),
    Resize(TerminalId, TermSize),
}

/// Single ordered queue of writes and resizes toward the backend.
///
/// Each call is awaited before the next starts, so input typed after a resize
/// reaches the process after the resize notification.
#[derive(Clone)]
pub struct BackendPump {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl BackendPump {
    pub fn spawn(backend: Arc<dyn Backend>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Write(id, data) => {
                        let len = data.len();
                        if let Err(e) = backend.write(&id, data).await {
                            tracing::debug!(terminal = %id, bytes = len, "Dropped terminal input: {}", e);
                        }
                    }
                    Outbound::Resize(id, size) => {
                        if let Err(e) = backend.resize(&id, size).await {
                            tracing::warn!(terminal = %id, %size, "Failed to resize terminal: {}", e);
                        }
                    }
                }
            }
        });
        (Self { tx }, task)
    }

    pub fn write(&self, terminal_id: &TerminalId, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let _ = self.tx.send(Outbound::Write(terminal_id.clone(), data));
    }

    pub fn resize(&self, terminal_id: &TerminalId, size: TermSize) {
        let _ = self.tx.send(Outbound::Resize(terminal_id.clone(), size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::BackendError;
    use crate::test_utils::{BackendCall, FakeBackend};

    #[tokio::test]
    async fn test_preserves_call_order() {
        let backend = FakeBackend::new();
        let (pump, task) = BackendPump::spawn(Arc::new(backend.clone()));
        let id = TerminalId::new("session-a-top");

        pump.write(&id, b"a".to_vec());
        pump.resize(&id, TermSize::new(100, 30));
        pump.write(&id, b"b".to_vec());
        drop(pump);
        task.await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Write(id.clone(), b"a".to_vec()),
                BackendCall::Resize(id.clone(), TermSize::new(100, 30)),
                BackendCall::Write(id, b"b".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_queue() {
        let backend = FakeBackend::new();
        backend.fail_writes(Some(BackendError::Io("closed".into())));
        backend.fail_resizes(Some(BackendError::Pty("gone".into())));
        let (pump, task) = BackendPump::spawn(Arc::new(backend.clone()));
        let id = TerminalId::new("t");

        pump.write(&id, b"x".to_vec());
        pump.resize(&id, TermSize::new(80, 24));
        pump.write(&id, b"y".to_vec());
        drop(pump);
        task.await.unwrap();

        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_writes_are_skipped() {
        let backend = FakeBackend::new();
        let (pump, task) = BackendPump::spawn(Arc::new(backend.clone()));
        pump.write(&TerminalId::new("t"), Vec::new());
        drop(pump);
        task.await.unwrap();
        assert!(backend.calls().is_empty());
    }
}
