//! Channel Subscription
//!
//! One state machine per channel, owning one socket connection:
//!
//! ```text
//! Connecting ──handshake──► Open ──interrupt──► Closing ──ack / timeout──► Closed
//!      │                     │
//!      └──connect error──────┴──read / write error──────────────────────► Closed
//! ```
//!
//! While Open, a reader task and a writer task run alongside the control
//! loop. The subscribe frame is the first frame queued, so it precedes every
//! other outbound frame. Inbound text frames are forwarded to the shared sink
//! tagged with the channel. A quiet connection gets exactly one ping per
//! keepalive breach. There is no reconnection: a failed subscription stays
//! Closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::keepalive::{KeepaliveConfig, KeepaliveDecision, KeepaliveTracker};
use crate::application::ports::{
    ChannelProtocol, CloseStatus, Connection, FrameSink, FrameStream, InboundFrame,
    TransportError, TransportPort, WireFrame,
};
use crate::domain::channel::ChannelId;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Settings shared by every subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Socket URL.
    pub url: String,
    /// Handshake headers.
    pub headers: Vec<(String, String)>,
    /// Keepalive behavior.
    pub keepalive: KeepaliveConfig,
    /// Bounded wait for the peer to acknowledge a close.
    pub close_timeout: Duration,
    /// Outbound queue size per subscription.
    pub outbound_buffer: usize,
}

impl SubscriptionConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            keepalive: KeepaliveConfig::default(),
            close_timeout: Duration::from_secs(1),
            outbound_buffer: 16,
        }
    }
}

// =============================================================================
// States
// =============================================================================

/// Lifecycle phase of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Handshake in progress.
    Connecting,
    /// Subscribed and exchanging frames.
    Open,
    /// Close frame sent, waiting for the peer.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionPhase {
    /// Phase name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Why a subscription reached Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Handshake failed.
    ConnectFailed,
    /// Interrupted and the close completed (acknowledged or stream ended).
    Interrupted,
    /// Interrupted and the peer never acknowledged within the close timeout.
    CloseTimedOut,
    /// Peer closed the connection.
    PeerClosed,
    /// Reading from the connection failed.
    ReadError,
    /// Writing to the connection failed.
    WriteError,
}

impl CloseReason {
    /// Reason name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectFailed => "connect_failed",
            Self::Interrupted => "interrupted",
            Self::CloseTimedOut => "close_timed_out",
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::WriteError => "write_error",
        }
    }
}

/// Reader task output.
#[derive(Debug)]
enum ReadEvent {
    Frame(String),
    PeerClosed(Option<CloseStatus>),
    Failed(TransportError),
}

/// Reader and writer tasks of an open connection; aborted on drop.
struct IoTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<Result<(), TransportError>>,
    writer_done: bool,
}

impl Drop for IoTasks {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// State machine for a single channel.
pub struct ChannelSubscription {
    channel: ChannelId,
    config: Arc<SubscriptionConfig>,
    transport: Arc<dyn TransportPort>,
    protocol: Arc<dyn ChannelProtocol>,
    sink: mpsc::Sender<InboundFrame>,
    interrupt: CancellationToken,
    phase: watch::Sender<ConnectionPhase>,
    sink_closed: bool,
}

impl ChannelSubscription {
    /// Create a subscription in the Connecting phase.
    #[must_use]
    pub fn new(
        channel: ChannelId,
        config: Arc<SubscriptionConfig>,
        transport: Arc<dyn TransportPort>,
        protocol: Arc<dyn ChannelProtocol>,
        sink: mpsc::Sender<InboundFrame>,
        interrupt: CancellationToken,
    ) -> Self {
        let (phase, _) = watch::channel(ConnectionPhase::Connecting);
        Self {
            channel,
            config,
            transport,
            protocol,
            sink,
            interrupt,
            phase,
            sink_closed: false,
        }
    }

    /// Channel this subscription serves.
    #[must_use]
    pub const fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Watch phase transitions.
    #[must_use]
    pub fn phases(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.subscribe()
    }

    /// Drive the subscription until it reaches Closed.
    pub async fn run(mut self) -> CloseReason {
        tracing::info!(channel = %self.channel, url = %self.config.url, "Connecting subscription");

        let connected = tokio::select! {
            biased;
            () = self.interrupt.cancelled() => None,
            result = self.transport.connect(&self.config.url, &self.config.headers) => Some(result),
        };

        let reason = match connected {
            None => CloseReason::Interrupted,
            Some(Err(e)) => {
                tracing::warn!(channel = %self.channel, error = %e, "Subscription connect failed");
                CloseReason::ConnectFailed
            }
            Some(Ok(connection)) => self.run_open(connection).await,
        };

        self.transition(ConnectionPhase::Closed);
        metrics::record_subscription_closed(reason.as_str());
        tracing::info!(channel = %self.channel, reason = reason.as_str(), "Subscription closed");
        reason
    }

    fn transition(&self, to: ConnectionPhase) {
        let from = self.phase.send_replace(to);
        tracing::debug!(
            channel = %self.channel,
            from = from.as_str(),
            to = to.as_str(),
            "Subscription phase changed"
        );
    }

    async fn run_open(&mut self, connection: Connection) -> CloseReason {
        let Connection { sink, stream } = connection;
        let buffer = self.config.outbound_buffer.max(2);

        let (outbound, outbound_rx) = mpsc::channel(buffer);
        let (event_tx, mut events) = mpsc::channel(buffer);
        let mut tasks = IoTasks {
            reader: tokio::spawn(read_loop(stream, event_tx)),
            writer: tokio::spawn(write_loop(sink, outbound_rx)),
            writer_done: false,
        };

        self.transition(ConnectionPhase::Open);
        metrics::record_subscription_opened();

        let init = match self.protocol.subscribe_frame(&self.channel) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(channel = %self.channel, error = %e, "Failed to encode subscribe frame");
                return CloseReason::WriteError;
            }
        };
        if outbound.send(WireFrame::Text(init)).await.is_err() {
            return CloseReason::WriteError;
        }
        tracing::debug!(channel = %self.channel, "Subscribe frame queued");

        let check_every = self.config.keepalive.check_every;
        let mut keepalive = KeepaliveTracker::new(self.config.keepalive.interval, Instant::now());
        let mut ticker = tokio::time::interval_at(Instant::now() + check_every, check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.interrupt.cancelled() => break,
                event = events.recv() => match event {
                    Some(ReadEvent::Frame(text)) => {
                        keepalive.record_inbound(Instant::now());
                        if !self.forward(text).await {
                            break;
                        }
                    }
                    Some(ReadEvent::PeerClosed(status)) => {
                        tracing::info!(
                            channel = %self.channel,
                            code = status.as_ref().map(|s| s.code),
                            "Peer closed subscription"
                        );
                        return CloseReason::PeerClosed;
                    }
                    Some(ReadEvent::Failed(e)) => {
                        tracing::warn!(channel = %self.channel, error = %e, "Subscription read failed");
                        return CloseReason::ReadError;
                    }
                    None => return CloseReason::ReadError,
                },
                result = &mut tasks.writer => {
                    tasks.writer_done = true;
                    match result {
                        Ok(Err(e)) => {
                            tracing::warn!(channel = %self.channel, error = %e, "Subscription write failed");
                        }
                        Ok(Ok(())) => {
                            tracing::warn!(channel = %self.channel, "Writer stopped unexpectedly");
                        }
                        Err(e) => {
                            tracing::error!(channel = %self.channel, error = %e, "Writer task failed");
                        }
                    }
                    return CloseReason::WriteError;
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    match keepalive.poll(now) {
                        KeepaliveDecision::SendPing => {
                            if !self.enqueue_ping(&outbound, keepalive.quiet_for(now)) {
                                keepalive.ping_failed();
                            }
                        }
                        KeepaliveDecision::AwaitingInbound => {
                            tracing::trace!(channel = %self.channel, "Ping already sent for this quiet period");
                        }
                        KeepaliveDecision::Idle => {}
                    }
                }
            }
        }

        self.close(&outbound, &mut events, &mut tasks).await
    }

    async fn close(
        &self,
        outbound: &mpsc::Sender<WireFrame>,
        events: &mut mpsc::Receiver<ReadEvent>,
        tasks: &mut IoTasks,
    ) -> CloseReason {
        self.transition(ConnectionPhase::Closing);
        tracing::info!(channel = %self.channel, "Interrupted, closing subscription");

        let handshake = async {
            if outbound
                .send(WireFrame::Close(Some(CloseStatus::normal())))
                .await
                .is_err()
            {
                return;
            }
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(ReadEvent::Frame(_)) => {}
                        Some(ReadEvent::PeerClosed(_)) | None => return,
                        Some(ReadEvent::Failed(e)) => {
                            tracing::debug!(channel = %self.channel, error = %e, "Read failed while closing");
                            return;
                        }
                    },
                    result = &mut tasks.writer, if !tasks.writer_done => {
                        tasks.writer_done = true;
                        if let Ok(Err(e)) = result {
                            tracing::debug!(channel = %self.channel, error = %e, "Write failed while closing");
                            return;
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.close_timeout, handshake)
            .await
            .is_ok()
        {
            CloseReason::Interrupted
        } else {
            tracing::warn!(
                channel = %self.channel,
                timeout_ms = self.config.close_timeout.as_millis(),
                "Peer did not acknowledge close"
            );
            CloseReason::CloseTimedOut
        }
    }

    /// Deliver a frame to the sink. Returns `false` if interrupted while
    /// waiting for sink capacity.
    async fn forward(&mut self, payload: String) -> bool {
        metrics::record_frame_received();
        tracing::trace!(channel = %self.channel, bytes = payload.len(), "Frame received");

        if self.sink_closed {
            return true;
        }
        let frame = InboundFrame {
            channel: self.channel.clone(),
            payload,
            received_at: Utc::now(),
        };
        let sent = tokio::select! {
            biased;
            () = self.interrupt.cancelled() => {
                tracing::debug!(channel = %self.channel, "Interrupted while inbound sink was full");
                return false;
            }
            result = self.sink.send(frame) => result,
        };
        if sent.is_err() {
            tracing::debug!(channel = %self.channel, "Inbound sink closed, dropping frames");
            self.sink_closed = true;
        }
        true
    }

    /// Queue a keepalive ping. Returns `false` if nothing was queued.
    fn enqueue_ping(&self, outbound: &mpsc::Sender<WireFrame>, quiet_for: Duration) -> bool {
        let ping = match self.protocol.ping_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(channel = %self.channel, error = %e, "Failed to encode ping frame");
                return false;
            }
        };
        match outbound.try_send(WireFrame::Text(ping)) {
            Ok(()) => {
                metrics::record_ping_sent();
                tracing::debug!(
                    channel = %self.channel,
                    quiet_ms = quiet_for.as_millis(),
                    "Keepalive ping queued"
                );
                true
            }
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "Could not queue keepalive ping, retrying next check");
                false
            }
        }
    }
}

impl std::fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("channel", &self.channel)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

async fn read_loop(mut stream: FrameStream, events: mpsc::Sender<ReadEvent>) {
    loop {
        let event = match stream.next().await {
            Some(Ok(WireFrame::Text(text))) => ReadEvent::Frame(text),
            Some(Ok(WireFrame::Close(status))) => ReadEvent::PeerClosed(status),
            Some(Err(e)) => ReadEvent::Failed(e),
            None => ReadEvent::PeerClosed(None),
        };
        let terminal = !matches!(event, ReadEvent::Frame(_));
        if events.send(event).await.is_err() || terminal {
            return;
        }
    }
}

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<WireFrame>,
) -> Result<(), TransportError> {
    while let Some(frame) = outbound.recv().await {
        let closing = frame.is_close();
        sink.send(frame).await?;
        if closing {
            return Ok(());
        }
    }
    Ok(())
}

// =============================================================================
// Completion
// =============================================================================

/// Resolves once every spawned subscription has reached Closed.
#[derive(Debug, Default)]
pub struct CompletionHandle {
    tasks: JoinSet<(ChannelId, CloseReason)>,
}

impl CompletionHandle {
    /// Create an empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `subscription` and track it.
    pub fn spawn(&mut self, subscription: ChannelSubscription) {
        let channel = subscription.channel().clone();
        self.tasks.spawn(async move { (channel, subscription.run().await) });
    }

    /// Number of subscriptions still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every subscription and return each close reason.
    pub async fn wait(mut self) -> Vec<(ChannelId, CloseReason)> {
        let mut closed = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(entry) => closed.push(entry),
                Err(e) => tracing::error!(error = %e, "Subscription task failed"),
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;

    use super::*;

    struct TestProtocol;

    impl ChannelProtocol for TestProtocol {
        fn subscribe_frame(&self, channel: &ChannelId) -> Result<String, TransportError> {
            Ok(format!("subscribe:{channel}"))
        }

        fn ping_frame(&self) -> Result<String, TransportError> {
            Ok("ping".to_string())
        }
    }

    /// The far end of an in-memory connection.
    struct Peer {
        written: fmpsc::UnboundedReceiver<WireFrame>,
        inbound: fmpsc::UnboundedSender<Result<WireFrame, TransportError>>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<WireFrame> {
            let mut frames = Vec::new();
            while let Ok(Some(frame)) = self.written.try_next() {
                frames.push(frame);
            }
            frames
        }

        fn push_text(&self, text: &str) {
            self.inbound
                .unbounded_send(Ok(WireFrame::Text(text.to_string())))
                .unwrap();
        }
    }

    /// Hands out one pre-built in-memory connection.
    struct MemoryTransport {
        connection: Mutex<Option<Connection>>,
        connects: AtomicUsize,
    }

    impl MemoryTransport {
        fn pair() -> (Arc<Self>, Peer) {
            let (write_tx, written) = fmpsc::unbounded();
            let (inbound, read_rx) = fmpsc::unbounded();
            let connection = Connection {
                sink: Box::pin(write_tx.sink_map_err(|e| TransportError::Write(e.to_string()))),
                stream: Box::pin(read_rx),
            };
            let transport = Arc::new(Self {
                connection: Mutex::new(Some(connection)),
                connects: AtomicUsize::new(0),
            });
            (transport, Peer { written, inbound })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self {
                connection: Mutex::new(None),
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransportPort for MemoryTransport {
        async fn connect(
            &self,
            _url: &str,
            _headers: &[(String, String)],
        ) -> Result<Connection, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connection
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| TransportError::Connect("refused".to_string()))
        }
    }

    fn config() -> Arc<SubscriptionConfig> {
        let mut config = SubscriptionConfig::new("ws://memory");
        config.keepalive = KeepaliveConfig::new(Duration::from_secs(6), Duration::from_secs(1));
        config.close_timeout = Duration::from_secs(1);
        Arc::new(config)
    }

    fn subscription(
        transport: Arc<MemoryTransport>,
        sink: mpsc::Sender<InboundFrame>,
        interrupt: &CancellationToken,
    ) -> ChannelSubscription {
        ChannelSubscription::new(
            ChannelId::new("nj_ent-eventgroup-1"),
            config(),
            transport,
            Arc::new(TestProtocol),
            sink,
            interrupt.clone(),
        )
    }

    fn text(s: &str) -> WireFrame {
        WireFrame::Text(s.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_frame_is_sent_first() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let task = tokio::spawn(subscription(transport, sink, &interrupt).run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(peer.drain(), vec![text("subscribe:nj_ent-eventgroup-1")]);

        interrupt.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_connection_pings_exactly_once_per_breach() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let task = tokio::spawn(subscription(transport, sink, &interrupt).run());

        tokio::time::sleep(Duration::from_millis(14_500)).await;
        let frames = peer.drain();
        assert_eq!(
            frames,
            vec![text("subscribe:nj_ent-eventgroup-1"), text("ping")]
        );

        interrupt.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frame_rearms_keepalive() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (sink, mut rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let task = tokio::spawn(subscription(transport, sink, &interrupt).run());

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        peer.push_text(r#"{"event":"pusher:pong"}"#);
        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.payload, r#"{"event":"pusher:pong"}"#);

        tokio::time::sleep(Duration::from_secs(7)).await;
        let pings = peer.drain().into_iter().filter(|f| *f == text("ping")).count();
        assert_eq!(pings, 2);

        interrupt.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_without_ack_closes_within_timeout() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let sub = subscription(transport, sink, &interrupt);
        let mut phases = sub.phases();
        let task = tokio::spawn(sub.run());

        phases.wait_for(|p| *p == ConnectionPhase::Open).await.unwrap();
        let started = Instant::now();
        interrupt.cancel();

        let reason = task.await.unwrap();
        assert_eq!(reason, CloseReason::CloseTimedOut);
        assert!(started.elapsed() <= Duration::from_millis(1_100));
        assert_eq!(*phases.borrow(), ConnectionPhase::Closed);

        let frames = peer.drain();
        assert_eq!(frames.last(), Some(&WireFrame::Close(Some(CloseStatus::normal()))));
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_close_finishes_early() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let sub = subscription(transport, sink, &interrupt);
        let mut phases = sub.phases();
        let task = tokio::spawn(sub.run());

        phases.wait_for(|p| *p == ConnectionPhase::Open).await.unwrap();
        let started = Instant::now();
        interrupt.cancel();

        let inbound = peer.inbound.clone();
        let echo = tokio::spawn(async move {
            while let Some(frame) = peer.written.next().await {
                if frame.is_close() {
                    inbound.unbounded_send(Ok(frame)).unwrap();
                    break;
                }
            }
        });

        assert_eq!(task.await.unwrap(), CloseReason::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(1));
        echo.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_closes_without_reconnecting() {
        let (transport, peer) = MemoryTransport::pair();
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let task = tokio::spawn(subscription(transport.clone(), sink, &interrupt).run());

        peer.inbound
            .unbounded_send(Err(TransportError::Read("reset".to_string())))
            .unwrap();

        assert_eq!(task.await.unwrap(), CloseReason::ReadError);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_is_terminal() {
        let (transport, peer) = MemoryTransport::pair();
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let task = tokio::spawn(subscription(transport, sink, &interrupt).run());

        peer.inbound
            .unbounded_send(Ok(WireFrame::Close(Some(CloseStatus {
                code: 4200,
                reason: "bye".to_string(),
            }))))
            .unwrap();

        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn connect_failure_is_terminal() {
        let (sink, _rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let reason = subscription(MemoryTransport::refusing(), sink, &interrupt)
            .run()
            .await;
        assert_eq!(reason, CloseReason::ConnectFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_tagged_with_their_channel() {
        let (transport, peer) = MemoryTransport::pair();
        let (sink, mut rx) = mpsc::channel(8);
        let interrupt = CancellationToken::new();
        let task = tokio::spawn(subscription(transport, sink, &interrupt).run());

        peer.push_text("one");
        peer.push_text("two");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.channel.as_str(), "nj_ent-eventgroup-1");
        assert_eq!((first.payload.as_str(), second.payload.as_str()), ("one", "two"));

        interrupt.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_closes_even_when_sink_is_full() {
        let (transport, mut peer) = MemoryTransport::pair();
        let (sink, _never_read) = mpsc::channel(1);
        let interrupt = CancellationToken::new();
        let sub = subscription(transport, sink, &interrupt);
        let mut phases = sub.phases();
        let task = tokio::spawn(sub.run());

        phases.wait_for(|p| *p == ConnectionPhase::Open).await.unwrap();
        for n in 0..3 {
            peer.push_text(&format!("frame-{n}"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*phases.borrow(), ConnectionPhase::Open);

        interrupt.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("subscription stayed Open after interrupt")
            .unwrap();

        assert_eq!(reason, CloseReason::CloseTimedOut);
        assert_eq!(*phases.borrow(), ConnectionPhase::Closed);
        let frames = peer.drain();
        assert_eq!(frames.last(), Some(&WireFrame::Close(Some(CloseStatus::normal()))));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_handle_waits_for_every_subscription() {
        let interrupt = CancellationToken::new();
        let (sink, _rx) = mpsc::channel(8);
        let mut handle = CompletionHandle::new();
        let mut peers = Vec::new();

        for i in 0..3 {
            let (transport, peer) = MemoryTransport::pair();
            peers.push(peer);
            handle.spawn(ChannelSubscription::new(
                ChannelId::new(format!("ch-{i}")),
                config(),
                transport,
                Arc::new(TestProtocol),
                sink.clone(),
                interrupt.clone(),
            ));
        }
        assert_eq!(handle.len(), 3);

        tokio::time::sleep(Duration::from_millis(10)).await;
        interrupt.cancel();

        let closed = handle.wait().await;
        assert_eq!(closed.len(), 3);
        assert!(closed.iter().all(|(_, r)| *r == CloseReason::CloseTimedOut));
    }
}
