//! Generic bidirectional message relay.
//!
//! [`DuplexForwarder`] joins two framed connections, A and B, through two
//! bounded queues and four concurrently spawned pumps:
//!
//! 1. receive from A, transform with `on_a`, push `forward` to `to_b` and
//!    `backward` to `to_a`
//! 2. drain `to_b` into B
//! 3. receive from B, transform with `on_b`, push `forward` to `to_a` and
//!    `backward` to `to_b`
//! 4. drain `to_a` into A
//!
//! The relay ends as soon as any pump ends. The remaining pumps are
//! cancelled; send pumps flush whatever is already queued and close their
//! sink before exiting. A full queue blocks the receive pump feeding it, so a
//! slow peer throttles the opposite peer's reads.
//!
//! The forwarder knows nothing about the realtime protocol. Everything
//! protocol-specific lives in the [`MessageTransform`] callbacks.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, SplitSink, SplitStream};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::buffer::{FrameEvent, MessageBuffer, RelayFrame};

/// Default capacity of each direction's queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Upper bound on flushing and closing a sink once the relay is ending.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of transforming one inbound message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessorResult {
    /// Continue toward the original destination.
    pub forward: Option<MessageBuffer>,
    /// Inject toward the side the message came from.
    pub backward: Option<MessageBuffer>,
}

impl ProcessorResult {
    /// Forward the message, nothing backward.
    pub fn forward(buffer: MessageBuffer) -> Self {
        Self {
            forward: Some(buffer),
            backward: None,
        }
    }

    /// Drop the message.
    pub fn suppress() -> Self {
        Self::default()
    }

    pub fn with_backward(mut self, buffer: MessageBuffer) -> Self {
        self.backward = Some(buffer);
        self
    }
}

/// Transform callback invoked once per inbound message, in arrival order.
pub type MessageTransform = Arc<
    dyn Fn(MessageBuffer) -> Pin<Box<dyn Future<Output = ProcessorResult> + Send>> + Send + Sync,
>;

/// Transform that forwards every message untouched.
pub fn passthrough() -> MessageTransform {
    Arc::new(|buffer| Box::pin(async move { ProcessorResult::forward(buffer) }))
}

/// One side of a relay: a sink to write frames and a stream to read them.
pub struct Leg<Si, St> {
    sink: Si,
    stream: St,
}

impl<Si, St> Leg<Si, St> {
    pub fn new(sink: Si, stream: St) -> Self {
        Self { sink, stream }
    }
}

impl<S, F> Leg<SplitSink<S, F>, SplitStream<S>>
where
    S: Sink<F> + Stream,
{
    /// Split a duplex socket into a leg.
    pub fn split(socket: S) -> Self {
        let (sink, stream) = socket.split();
        Self { sink, stream }
    }
}

/// Identifies one of the four pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    ReceiveA,
    SendB,
    ReceiveB,
    SendA,
}

impl fmt::Display for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pump::ReceiveA => write!(f, "receive-a"),
            Pump::SendB => write!(f, "send-b"),
            Pump::ReceiveB => write!(f, "receive-b"),
            Pump::SendA => write!(f, "send-a"),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The connection or queue closed normally.
    Closed,
    /// A transport error ended the pump.
    Failed(String),
    /// The relay was cancelled.
    Cancelled,
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::Closed => write!(f, "closed"),
            PumpExit::Failed(reason) => write!(f, "failed: {reason}"),
            PumpExit::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The pump that ended first, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayExit {
    pub pump: Pump,
    pub exit: PumpExit,
}

/// Runs four pumps between two legs until one of them stops.
#[derive(Debug, Clone, Copy)]
pub struct DuplexForwarder {
    capacity: usize,
}

impl Default for DuplexForwarder {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl DuplexForwarder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Relay between `a` and `b` until any pump ends or `cancel` fires.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<SiA, StA, FA, EA, SiB, StB, FB, EB>(
        &self,
        a: Leg<SiA, StA>,
        on_a: MessageTransform,
        b: Leg<SiB, StB>,
        on_b: MessageTransform,
        cancel: CancellationToken,
    ) -> RelayExit
    where
        FA: RelayFrame,
        FB: RelayFrame,
        EA: fmt::Display + Send + 'static,
        EB: fmt::Display + Send + 'static,
        StA: Stream<Item = Result<FA, EA>> + Unpin + Send + 'static,
        StB: Stream<Item = Result<FB, EB>> + Unpin + Send + 'static,
        SiA: Sink<FA> + Unpin + Send + 'static,
        SiB: Sink<FB> + Unpin + Send + 'static,
        SiA::Error: fmt::Display + Send,
        SiB::Error: fmt::Display + Send,
    {
        let token = cancel.child_token();
        let (to_b_tx, to_b_rx) = mpsc::channel(self.capacity);
        let (to_a_tx, to_a_rx) = mpsc::channel(self.capacity);

        let handles = [
            (
                Pump::ReceiveA,
                tokio::spawn(receive_pump(
                    a.stream,
                    on_a,
                    to_b_tx.clone(),
                    to_a_tx.clone(),
                    token.clone(),
                )),
            ),
            (
                Pump::SendB,
                tokio::spawn(send_pump(b.sink, to_b_rx, token.clone())),
            ),
            (
                Pump::ReceiveB,
                tokio::spawn(receive_pump(b.stream, on_b, to_a_tx, to_b_tx, token.clone())),
            ),
            (
                Pump::SendA,
                tokio::spawn(send_pump(a.sink, to_a_rx, token.clone())),
            ),
        ];

        let mut pumps: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(pump, handle)| {
                handle.map(move |joined| {
                    let exit = joined.unwrap_or_else(|e| PumpExit::Failed(e.to_string()));
                    (pump, exit)
                })
            })
            .collect();

        let (pump, exit) = match pumps.next().await {
            Some(first) => first,
            None => (Pump::ReceiveA, PumpExit::Closed),
        };
        debug!(pump = %pump, exit = %exit, "Relay pump finished first, stopping relay");
        token.cancel();

        while let Some((other, other_exit)) = pumps.next().await {
            trace!(pump = %other, exit = %other_exit, "Relay pump stopped");
        }

        RelayExit { pump, exit }
    }
}

async fn receive_pump<St, F, E>(
    mut stream: St,
    transform: MessageTransform,
    forward: mpsc::Sender<MessageBuffer>,
    backward: mpsc::Sender<MessageBuffer>,
    cancel: CancellationToken,
) -> PumpExit
where
    St: Stream<Item = Result<F, E>> + Unpin,
    F: RelayFrame,
    E: fmt::Display,
{
    let pump = async {
        while let Some(frame) = stream.next().await {
            let buffer = match frame {
                Ok(frame) => match frame.into_event() {
                    FrameEvent::Message(buffer) => buffer,
                    FrameEvent::Skip => continue,
                    FrameEvent::Close => return PumpExit::Closed,
                },
                Err(e) => return PumpExit::Failed(e.to_string()),
            };

            let result = transform(buffer).await;

            if let Some(message) = result.forward {
                if forward.send(message).await.is_err() {
                    return PumpExit::Closed;
                }
            }
            if let Some(message) = result.backward {
                if backward.send(message).await.is_err() {
                    return PumpExit::Closed;
                }
            }
        }
        PumpExit::Closed
    };

    tokio::select! {
        _ = cancel.cancelled() => PumpExit::Cancelled,
        exit = pump => exit,
    }
}

async fn send_pump<Si, F>(
    mut sink: Si,
    mut queue: mpsc::Receiver<MessageBuffer>,
    cancel: CancellationToken,
) -> PumpExit
where
    Si: Sink<F> + Unpin,
    Si::Error: fmt::Display,
    F: RelayFrame,
{
    loop {
        let buffer = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(buffer) => buffer,
                None => break,
            },
        };

        let sent = tokio::select! {
            biased;
            sent = sink.send(F::from_buffer(buffer)) => sent,
            _ = cancel.cancelled() => break,
        };
        if let Err(e) = sent {
            return PumpExit::Failed(e.to_string());
        }
    }

    queue.close();
    let flush = async {
        while let Ok(buffer) = queue.try_recv() {
            sink.send(F::from_buffer(buffer)).await?;
        }
        sink.close().await
    };
    match tokio::time::timeout(SINK_CLOSE_TIMEOUT, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error closing relay sink"),
        Err(_) => debug!("Timed out closing relay sink"),
    }

    if cancel.is_cancelled() {
        PumpExit::Cancelled
    } else {
        PumpExit::Closed
    }
}
