//! Escape-framed messages over a TCP or TLS socket.

use futures_util::{SinkExt, StreamExt};
use tcflink_codec::{Inbound, Message, StreamCodec};
use tcflink_frame::FrameConfig;
use tcflink_transport::{connect, ShutdownFlag, SocketConfig, SocketStream};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::error::{ChannelError, Result};
use crate::transport::{EventSender, Transport, TransportEvent};

enum Source {
    Connect(SocketConfig),
    Accepted(SocketStream),
}

/// Work for the writer task.
enum Output {
    Message(Message),
    Flush,
}

/// Socket binding.
///
/// Connecting and reading run in one spawned task, writing in another. The
/// dispatch task only queues output, so a peer that stops reading never
/// stalls it.
pub struct SocketTransport {
    source: Option<Source>,
    peer: String,
    frame: FrameConfig,
    shutdown: ShutdownFlag,
    output: Option<mpsc::UnboundedSender<Output>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SocketTransport {
    /// Connect to `config` once started.
    pub fn new(config: SocketConfig) -> Self {
        Self::with_frame_config(config, FrameConfig::default())
    }

    pub fn with_frame_config(config: SocketConfig, frame: FrameConfig) -> Self {
        Self::from_source(config.addr(), Source::Connect(config), frame)
    }

    /// Wrap an already connected stream, e.g. one accepted by an agent.
    pub fn accepted(stream: SocketStream, frame: FrameConfig) -> Self {
        let peer = format!("accepted {}", stream.transport_name());
        Self::from_source(peer, Source::Accepted(stream), frame)
    }

    fn from_source(peer: String, source: Source, frame: FrameConfig) -> Self {
        Self {
            source: Some(source),
            peer,
            frame,
            shutdown: ShutdownFlag::new(),
            output: None,
            reader: None,
            writer: None,
        }
    }

    fn queue(&self, item: Output) {
        let Some(output) = &self.output else {
            return;
        };
        // A gone writer has already reported why it stopped.
        if output.send(item).is_err() {
            trace!(peer = %self.peer, "writer gone, output dropped");
        }
    }

    fn abort_tasks(&mut self) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> &'static str {
        "socket"
    }

    fn start(&mut self, events: EventSender) {
        let Some(source) = self.source.take() else {
            return;
        };
        let (half_tx, half_rx) = oneshot::channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        self.output = Some(output_tx);

        self.writer = Some(tokio::spawn(write_loop(
            half_rx,
            output_rx,
            self.frame.clone(),
            self.shutdown.clone(),
            events.clone(),
        )));

        let frame = self.frame.clone();
        let shutdown = self.shutdown.clone();
        let peer = self.peer.clone();
        self.reader = Some(tokio::spawn(async move {
            let stream = match source {
                Source::Connect(config) => match connect(&config).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        let cause = shutdown.filter(ChannelError::from(err));
                        events.send(TransportEvent::Terminated(cause)).await;
                        return;
                    }
                },
                Source::Accepted(stream) => stream,
            };
            let (read, write) = tokio::io::split(stream);
            if half_tx.send(write).is_err() {
                return;
            }
            debug!(%peer, "socket channel connected");
            if !events.send(TransportEvent::Connected).await {
                return;
            }
            read_loop(read, frame, shutdown, events).await;
        }));
    }

    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        if self.shutdown.is_tripped() {
            return Ok(());
        }
        trace!(peer = %self.peer, %msg, "send");
        self.queue(Output::Message(msg.clone()));
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.shutdown.is_tripped() {
            self.queue(Output::Flush);
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.shutdown.trip() {
            debug!(peer = %self.peer, "closing socket channel");
        }
        // Queued output is abandoned; dropping both halves closes the socket.
        self.output = None;
        self.abort_tasks();
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

async fn write_loop(
    half: oneshot::Receiver<WriteHalf<SocketStream>>,
    mut output: mpsc::UnboundedReceiver<Output>,
    frame: FrameConfig,
    shutdown: ShutdownFlag,
    events: EventSender,
) {
    let Ok(write) = half.await else {
        return;
    };
    let mut framed = FramedWrite::new(write, StreamCodec::new(&frame));
    while let Some(item) = output.recv().await {
        let sent = match &item {
            Output::Message(msg) => framed.feed(msg).await,
            Output::Flush => SinkExt::<&Message>::flush(&mut framed).await,
        };
        if let Err(err) = sent {
            let cause = shutdown.filter(ChannelError::from(err));
            events.send(TransportEvent::Terminated(cause)).await;
            return;
        }
    }
}

async fn read_loop(
    read: ReadHalf<SocketStream>,
    frame: FrameConfig,
    shutdown: ShutdownFlag,
    events: EventSender,
) {
    let mut framed = FramedRead::new(read, StreamCodec::new(&frame));
    let cause = loop {
        let next = framed.next().await;
        if shutdown.is_tripped() {
            break None;
        }
        match next {
            Some(Ok(Inbound::Message(msg))) => {
                trace!(%msg, "recv");
                if !events.send(TransportEvent::Message(msg)).await {
                    return;
                }
            }
            Some(Ok(Inbound::EndOfStream)) | None => {
                debug!("socket end of stream");
                break None;
            }
            Some(Err(err)) => break shutdown.filter(ChannelError::from(err)),
        }
    };
    events.send(TransportEvent::Terminated(cause)).await;
}
