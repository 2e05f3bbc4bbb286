//! Per-connection state machine and bookkeeping.

use crate::base::neterror::NetError;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// `Connecting -> Open -> Closing -> Closed`, with `Error` reachable from
/// every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl ConnectionState {
    /// Handshake finished.
    pub fn open(self) -> Result<Self, NetError> {
        match self {
            ConnectionState::Connecting => Ok(ConnectionState::Open),
            _ => Err(NetError::WsProtocolError),
        }
    }

    /// A close was requested locally or received. Repeating it is a no-op.
    pub fn closing(self) -> Self {
        match self {
            ConnectionState::Connecting | ConnectionState::Open => ConnectionState::Closing,
            other => other,
        }
    }

    pub fn closed(self) -> Self {
        match self {
            ConnectionState::Error => ConnectionState::Error,
            _ => ConnectionState::Closed,
        }
    }

    pub fn fail(self) -> Self {
        ConnectionState::Error
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Error)
    }
}

/// Work for the task that owns the socket.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Send(String),
    Ping,
    Close { code: u16, reason: String },
}

/// Registry entry for one live connection.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) request_id: String,
    pub(crate) collection_uid: String,
    /// Distinguishes this connection from a later one with the same id.
    pub(crate) generation: u64,
    state: ConnectionState,
    queue: VecDeque<String>,
    capacity: usize,
    commands: Option<mpsc::Sender<Command>>,
    keep_alive: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    close_reason: Option<(u16, String)>,
}

impl Connection {
    pub(crate) fn new(
        request_id: impl Into<String>,
        collection_uid: impl Into<String>,
        generation: u64,
        capacity: usize,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            collection_uid: collection_uid.into(),
            generation,
            state: ConnectionState::Connecting,
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            commands: None,
            keep_alive: None,
            cancel: CancellationToken::new(),
            close_reason: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn close_reason(&self) -> Option<&(u16, String)> {
        self.close_reason.as_ref()
    }

    /// Buffer a message until the connection opens.
    pub(crate) fn enqueue(&mut self, message: String) -> Result<(), NetError> {
        if self.queue.len() >= self.capacity {
            tracing::warn!("ws {}: outbound queue full", self.request_id);
            return Err(NetError::WsQueueFull);
        }
        self.queue.push_back(message);
        Ok(())
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Move to `Open`, handing back the buffered messages in order.
    pub(crate) fn mark_open(
        &mut self,
        commands: mpsc::Sender<Command>,
    ) -> Result<Vec<String>, NetError> {
        self.state = self.state.open()?;
        self.commands = Some(commands);
        Ok(self.queue.drain(..).collect())
    }

    pub(crate) fn set_keep_alive(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.keep_alive.replace(handle) {
            old.abort();
        }
    }

    /// Hand a command to the socket task. Only valid while open.
    pub(crate) fn command(&self, command: Command) -> Result<(), NetError> {
        if !self.state.is_open() {
            return Err(NetError::WsNotOpen);
        }
        let sender = self.commands.as_ref().ok_or(NetError::WsNotOpen)?;
        sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetError::WsQueueFull,
            mpsc::error::TrySendError::Closed(_) => NetError::WsNotOpen,
        })
    }

    /// Begin a close. Returns false when one is already under way.
    pub(crate) fn begin_close(&mut self, code: u16, reason: &str) -> bool {
        if matches!(self.state, ConnectionState::Closing) || self.state.is_terminal() {
            return false;
        }
        let was_open = self.state.is_open();
        self.state = self.state.closing();
        self.close_reason = Some((code, reason.to_string()));
        self.stop_keep_alive();
        if was_open {
            let sent = self.command_unchecked(Command::Close {
                code,
                reason: reason.to_string(),
            });
            if !sent {
                self.cancel.cancel();
            }
        } else {
            self.cancel.cancel();
        }
        true
    }

    pub(crate) fn finish(&mut self, failed: bool) {
        self.state = if failed {
            self.state.fail()
        } else {
            self.state.closed()
        };
        self.stop_keep_alive();
        self.commands = None;
        self.queue.clear();
    }

    fn command_unchecked(&self, command: Command) -> bool {
        self.commands
            .as_ref()
            .is_some_and(|s| s.try_send(command).is_ok())
    }

    fn stop_keep_alive(&mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop_keep_alive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let s = ConnectionState::Connecting;
        let s = s.open().unwrap();
        assert!(s.is_open());
        assert!(s.open().is_err());
        let s = s.closing();
        assert_eq!(s, ConnectionState::Closing);
        assert_eq!(s.closing(), ConnectionState::Closing);
        let s = s.closed();
        assert!(s.is_terminal());
        assert_eq!(s.closing(), ConnectionState::Closed);
        assert_eq!(ConnectionState::Open.fail().closed(), ConnectionState::Error);
    }

    #[test]
    fn test_queue_flushes_in_order() {
        let mut conn = Connection::new("r1", "c1", 1, 8);
        conn.enqueue("a".into()).unwrap();
        conn.enqueue("b".into()).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        assert_eq!(conn.mark_open(tx).unwrap(), vec!["a", "b"]);
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn test_queue_bounded() {
        let mut conn = Connection::new("r1", "c1", 1, 2);
        conn.enqueue("a".into()).unwrap();
        conn.enqueue("b".into()).unwrap();
        assert_eq!(conn.enqueue("c".into()), Err(NetError::WsQueueFull));
    }

    #[test]
    fn test_command_requires_open() {
        let conn = Connection::new("r1", "c1", 1, 2);
        assert_eq!(conn.command(Command::Ping), Err(NetError::WsNotOpen));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut conn = Connection::new("r1", "c1", 1, 2);
        let (tx, mut rx) = mpsc::channel(8);
        conn.mark_open(tx).unwrap();
        assert!(conn.begin_close(1000, "bye"));
        assert!(!conn.begin_close(1000, "bye"));
        assert_eq!(
            rx.recv().await,
            Some(Command::Close {
                code: 1000,
                reason: "bye".into()
            })
        );
        conn.finish(false);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.begin_close(1000, "again"));
        assert_eq!(conn.close_reason(), Some(&(1000, "bye".to_string())));
    }

    #[test]
    fn test_close_before_open_cancels() {
        let mut conn = Connection::new("r1", "c1", 1, 2);
        let token = conn.cancel_token();
        assert!(conn.begin_close(1000, "bye"));
        assert!(token.is_cancelled());
    }
}
