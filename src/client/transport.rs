//! Reconnecting push channel over a WebSocket.
//!
//! A background task owns the socket and drives an explicit state machine:
//! `Connecting → Open → ClosedRetrying → Connecting … → ClosedFinal`. Socket
//! failures are never fatal; they schedule a reconnect with exponential
//! backoff. Only an explicit `close` (or the optional attempt ceiling) is
//! terminal.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::realtime::Envelope;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedRetrying,
    ClosedFinal,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever. `Some(n)` allows n reconnect attempts after a
    /// failure before the session gives up with [`TransportEvent::GaveUp`].
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_millis(15_000),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base_delay * 2^retry_count, max_delay)`, saturating.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        let delay = base.saturating_mul(2u64.saturating_pow(retry_count));
        Duration::from_millis(delay.min(max))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message { kind: String, payload: serde_json::Value },
    /// `will_retry` is false only for the terminal close.
    Closed { will_retry: bool },
    /// The configured attempt ceiling was reached; the session is terminal.
    GaveUp,
}

/// A connected socket reduced to text frames in both directions. The inbound
/// channel yields at most one `Err` (the disconnect reason) and then ends.
pub struct SocketPair {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Result<String, TransportError>>,
}

/// How the session obtains a socket. Production uses [`WsConnector`]; tests
/// script outcomes without a network.
pub trait SocketConnector: Send + 'static {
    fn connect(
        &mut self,
        url: &str,
    ) -> impl Future<Output = Result<SocketPair, TransportError>> + Send;
}

/// tokio-tungstenite connector. Two pump tasks bridge the socket to the
/// channel pair and end when the socket does.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl SocketConnector for WsConnector {
    async fn connect(&mut self, url: &str) -> Result<SocketPair, TransportError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound) = mpsc::channel::<Result<String, TransportError>>(64);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                // Write failures surface through the read side.
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(Ok(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = inbound_tx
                            .send(Err(TransportError::Socket("closed by server".into())))
                            .await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = inbound_tx
                            .send(Err(TransportError::Socket(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(SocketPair { outbound, inbound })
    }
}

enum SessionCmd {
    Send(String),
    Close,
}

struct CloseOnDrop {
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SessionCmd::Close);
    }
}

/// Cheap cloneable handle onto the session task. Dropping the last handle
/// closes the session (unsubscribe teardown).
#[derive(Clone)]
pub struct TransportSession {
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    state_rx: watch::Receiver<ConnectionState>,
    _guard: Arc<CloseOnDrop>,
}

impl TransportSession {
    /// Starts in `Connecting` and immediately attempts to open. Events are
    /// delivered on the returned receiver until the session is terminal.
    pub fn subscribe<C: SocketConnector>(
        url: impl Into<String>,
        connector: C,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(session_task(
            connector,
            url.into(),
            policy,
            cmd_rx,
            event_tx,
            state_tx,
        ));

        let session = Self {
            cmd_tx: cmd_tx.clone(),
            state_rx,
            _guard: Arc::new(CloseOnDrop { cmd_tx }),
        };
        (session, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Best effort: enqueues for transmission and returns true only while
    /// the channel is `Open`. Nothing is queued across disconnects.
    pub fn send(&self, payload: serde_json::Value) -> bool {
        if self.state() != ConnectionState::Open {
            return false;
        }
        self.cmd_tx.send(SessionCmd::Send(payload.to_string())).is_ok()
    }

    /// Irreversible: cancels any pending reconnect and ends the session.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(SessionCmd::Close);
    }
}

async fn session_task<C: SocketConnector>(
    mut connector: C,
    url: String,
    policy: ReconnectPolicy,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut retry_count: u32 = 0;

    loop {
        let _ = state_tx.send(ConnectionState::Connecting);

        let connected = tokio::select! {
            result = connector.connect(&url) => result,
            _ = wait_for_close(&mut cmd_rx) => {
                finish(&state_tx, &event_tx);
                return;
            }
        };

        match connected {
            Ok(mut pair) => {
                retry_count = 0;
                let _ = state_tx.send(ConnectionState::Open);
                let _ = event_tx.send(TransportEvent::Opened);

                if pump(&mut pair, &mut cmd_rx, &event_tx).await {
                    finish(&state_tx, &event_tx);
                    return;
                }
            }
            Err(e) => {
                tracing::debug!("connect attempt failed: {}", e);
            }
        }

        if let Some(max) = policy.max_attempts {
            if retry_count >= max {
                tracing::warn!(attempts = retry_count, "reconnect ceiling reached, giving up");
                let _ = state_tx.send(ConnectionState::ClosedFinal);
                let _ = event_tx.send(TransportEvent::GaveUp);
                return;
            }
        }

        let _ = state_tx.send(ConnectionState::ClosedRetrying);
        let _ = event_tx.send(TransportEvent::Closed { will_retry: true });

        let delay = policy.delay_for(retry_count);
        retry_count += 1;
        tracing::debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = retry_count,
            "scheduling reconnect"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_close(&mut cmd_rx) => {
                finish(&state_tx, &event_tx);
                return;
            }
        }
    }
}

/// Runs one open connection. Returns true when the caller closed the
/// session, false on disconnect.
async fn pump(
    pair: &mut SocketPair,
    cmd_rx: &mut mpsc::UnboundedReceiver<SessionCmd>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> bool {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCmd::Send(frame)) => {
                    if pair.outbound.send(frame).await.is_err() {
                        return false;
                    }
                }
                Some(SessionCmd::Close) | None => return true,
            },
            frame = pair.inbound.recv() => match frame {
                Some(Ok(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => {
                        let _ = event_tx.send(TransportEvent::Message {
                            kind: envelope.kind,
                            payload: envelope.payload,
                        });
                    }
                    // A bad frame must never take the session down.
                    Err(e) => tracing::warn!("dropping malformed push frame: {}", e),
                },
                Some(Err(e)) => {
                    tracing::debug!("push socket lost: {}", e);
                    return false;
                }
                None => {
                    tracing::debug!("push socket ended");
                    return false;
                }
            },
        }
    }
}

/// Resolves once the caller closes the session (or drops every handle).
/// Send commands arriving while disconnected are dropped, not queued.
async fn wait_for_close(cmd_rx: &mut mpsc::UnboundedReceiver<SessionCmd>) {
    loop {
        match cmd_rx.recv().await {
            Some(SessionCmd::Send(_)) => continue,
            Some(SessionCmd::Close) | None => return,
        }
    }
}

fn finish(
    state_tx: &watch::Sender<ConnectionState>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) {
    let _ = state_tx.send(ConnectionState::ClosedFinal);
    let _ = event_tx.send(TransportEvent::Closed { will_retry: false });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Hands out scripted connect outcomes and records when each attempt
    /// happened. `None` entries fail; an exhausted script keeps failing.
    struct ScriptedConnector {
        outcomes: VecDeque<Option<SocketPair>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedConnector {
        fn failing() -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let attempts = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    outcomes: VecDeque::new(),
                    attempts: attempts.clone(),
                },
                attempts,
            )
        }

        fn scripted(outcomes: Vec<Option<SocketPair>>) -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let attempts = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    outcomes: outcomes.into(),
                    attempts: attempts.clone(),
                },
                attempts,
            )
        }
    }

    impl SocketConnector for ScriptedConnector {
        async fn connect(&mut self, _url: &str) -> Result<SocketPair, TransportError> {
            self.attempts.lock().unwrap().push(Instant::now());
            match self.outcomes.pop_front() {
                Some(Some(pair)) => Ok(pair),
                _ => Err(TransportError::Connect("scripted failure".into())),
            }
        }
    }

    /// A scripted open socket: the test keeps the far ends.
    struct TestSocket {
        pair: Option<SocketPair>,
        push_tx: mpsc::Sender<Result<String, TransportError>>,
        sent_rx: mpsc::Receiver<String>,
    }

    fn test_socket() -> TestSocket {
        let (outbound, sent_rx) = mpsc::channel(16);
        let (push_tx, inbound) = mpsc::channel(16);
        TestSocket {
            pair: Some(SocketPair { outbound, inbound }),
            push_tx,
            sent_rx,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        events.recv().await.expect("event stream ended early")
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy::default();
        let expected = [1500u64, 3000, 6000, 12_000, 15_000, 15_000];
        for (retry, ms) in expected.iter().enumerate() {
            assert_eq!(policy.delay_for(retry as u32), Duration::from_millis(*ms));
        }
        // Far past the cap, without overflowing.
        assert_eq!(policy.delay_for(100), Duration::from_millis(15_000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_follow_the_backoff_ladder() {
        let (connector, attempts) = ScriptedConnector::failing();
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        // One Closed{will_retry} per failed attempt.
        for _ in 0..6 {
            assert_eq!(
                next_event(&mut events).await,
                TransportEvent::Closed { will_retry: true }
            );
        }
        session.close();

        let attempts = attempts.lock().unwrap();
        let gaps: Vec<u64> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![1500, 3000, 6000, 12_000, 15_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_successful_open_restarts_the_ladder() {
        let mut socket = test_socket();
        let (connector, attempts) = ScriptedConnector::scripted(vec![
            None,
            None,
            socket.pair.take(),
        ]);
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        assert_eq!(next_event(&mut events).await, TransportEvent::Opened);

        // Kill the connection; the next delays must be 1500 and 3000 again,
        // not a continuation of the previous ladder.
        drop(socket.push_tx);
        for _ in 0..3 {
            assert_eq!(
                next_event(&mut events).await,
                TransportEvent::Closed { will_retry: true }
            );
        }
        session.close();

        // Two failures, the successful open, then two post-open attempts.
        // The disconnect happens at the same paused-clock instant as the
        // open, so the post-open gaps start from the open attempt.
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 5);
        let after_open: Vec<u64> = attempts[2..]
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert_eq!(after_open, vec![1500, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_refused_unless_open() {
        let (connector, _) = ScriptedConnector::failing();
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        assert_eq!(session.state(), ConnectionState::ClosedRetrying);
        assert!(!session.send(serde_json::json!({"hello": true})));

        session.close();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: false }
        );
        assert_eq!(session.state(), ConnectionState::ClosedFinal);
        assert!(!session.send(serde_json::json!({"hello": true})));
    }

    #[tokio::test(start_paused = true)]
    async fn open_session_transmits_and_delivers() {
        let mut socket = test_socket();
        let (connector, _) = ScriptedConnector::scripted(vec![socket.pair.take()]);
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        assert_eq!(next_event(&mut events).await, TransportEvent::Opened);
        assert_eq!(session.state(), ConnectionState::Open);

        assert!(session.send(serde_json::json!({"type": "ping", "payload": {}})));
        let sent = socket.sent_rx.recv().await.unwrap();
        assert!(sent.contains("ping"));

        socket
            .push_tx
            .send(Ok(r#"{"type":"chat.message","payload":{"thread_id":"t-1"}}"#.into()))
            .await
            .unwrap();
        match next_event(&mut events).await {
            TransportEvent::Message { kind, payload } => {
                assert_eq!(kind, "chat.message");
                assert_eq!(payload["thread_id"], "t-1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped_not_fatal() {
        let mut socket = test_socket();
        let (connector, _) = ScriptedConnector::scripted(vec![socket.pair.take()]);
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        assert_eq!(next_event(&mut events).await, TransportEvent::Opened);

        socket.push_tx.send(Ok("definitely not json".into())).await.unwrap();
        socket
            .push_tx
            .send(Ok(r#"{"type":"poll.update","payload":{"poll_id":"p-1"}}"#.into()))
            .await
            .unwrap();

        // Only the well-formed frame comes through; the session stayed up.
        match next_event(&mut events).await {
            TransportEvent::Message { kind, .. } => assert_eq!(kind, "poll.update"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(session.state(), ConnectionState::Open);
        session.close();
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_the_pending_reconnect() {
        let (connector, attempts) = ScriptedConnector::failing();
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        session.close();

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: false }
        );
        assert!(events.recv().await.is_none());
        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_ceiling_gives_up_with_a_distinct_event() {
        let (connector, attempts) = ScriptedConnector::failing();
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        let (session, mut events) = TransportSession::subscribe("ws://test", connector, policy);

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        assert_eq!(next_event(&mut events).await, TransportEvent::GaveUp);
        assert!(events.recv().await.is_none());

        assert_eq!(session.state(), ConnectionState::ClosedFinal);
        assert!(!session.send(serde_json::json!({})));
        // Initial attempt plus the two allowed retries.
        assert_eq!(attempts.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_last_handle_closes_the_session() {
        let (connector, _) = ScriptedConnector::failing();
        let (session, mut events) =
            TransportSession::subscribe("ws://test", connector, ReconnectPolicy::default());

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: true }
        );
        drop(session);

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed { will_retry: false }
        );
        assert!(events.recv().await.is_none());
    }
}
