use async_trait::async_trait;
use tcflink_codec::Message;
use tokio::sync::mpsc;

use crate::error::{ChannelError, Result};

/// What a binding reports to the dispatch task.
#[derive(Debug)]
pub enum TransportEvent {
    /// The link is up; the dispatch task may start writing.
    Connected,
    /// One inbound message, in transport order.
    Message(Message),
    /// The link is gone. `None` is a quiet end of stream.
    Terminated(Option<ChannelError>),
}

/// Posting side of the dispatch queue, handed to background I/O.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::Sender<TransportEvent>);

impl EventSender {
    pub(crate) fn new(inner: mpsc::Sender<TransportEvent>) -> Self {
        Self(inner)
    }

    /// Post an event. Returns `false` once the dispatch task has exited.
    pub async fn send(&self, event: TransportEvent) -> bool {
        self.0.send(event).await.is_ok()
    }

    /// Build a sender paired with a receiver outside of a channel.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self(tx), rx)
    }
}

/// A physical binding for one channel.
///
/// All methods are called from the dispatch task only. Blocking work
/// (connecting, reading, long polls) runs in tasks spawned by
/// [`start`](Transport::start) and reports back through the [`EventSender`].
#[async_trait]
pub trait Transport: Send + 'static {
    /// Short binding name for diagnostics.
    fn kind(&self) -> &'static str;

    /// Start background I/O. Must not block.
    fn start(&mut self, events: EventSender);

    /// Called when the remote hello has been received.
    fn opened(&mut self) {}

    /// Queue one outgoing message.
    async fn write_message(&mut self, msg: &Message) -> Result<()>;

    /// Push queued output to the remote.
    async fn flush(&mut self) -> Result<()>;

    /// Tear down without flushing. Later I/O failures are quiet.
    async fn stop(&mut self) -> Result<()>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn start(&mut self, events: EventSender) {
        (**self).start(events)
    }

    fn opened(&mut self) {
        (**self).opened()
    }

    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        (**self).write_message(msg).await
    }

    async fn flush(&mut self) -> Result<()> {
        (**self).flush().await
    }

    async fn stop(&mut self) -> Result<()> {
        (**self).stop().await
    }
}

