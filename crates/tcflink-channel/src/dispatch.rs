//! The single-consumer dispatch task behind every channel.
//!
//! One task per channel owns the [`DispatchCore`] and the [`Transport`].
//! Background I/O posts [`TransportEvent`]s into a bounded queue; callers
//! post closures through the [`Channel`] handle. Both are consumed in order
//! by the same task, so the core is never touched concurrently.

use std::collections::VecDeque;
use std::fmt;

use tcflink_codec::Message;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{ChannelError, Result};
use crate::locator;
use crate::transport::{EventSender, Transport, TransportEvent};

/// Default capacity of the inbound event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Connecting, or waiting for the remote hello.
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelState::Opening => "opening",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        })
    }
}

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of the inbound event queue. Default: 256.
    pub queue_capacity: usize,
    /// Services announced in the hello sent on connect. Empty: no hello.
    pub hello_services: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            hello_services: vec![locator::LOCATOR.to_string()],
        }
    }
}

/// The consumer of a channel's decoded messages.
///
/// Token matching, service registries and listeners live behind this trait.
/// Every method runs on the dispatch task.
pub trait DispatchCore: Send + 'static {
    /// One inbound message, in arrival order.
    fn deliver(&mut self, msg: Message);

    /// Outgoing messages ready to send. Called after every dispatched event.
    fn drain(&mut self) -> Vec<Message>;

    /// The channel ended. `None` means a clean or locally requested close.
    fn terminated(&mut self, cause: Option<&ChannelError>);

    /// The transport is up and writable.
    fn connected(&mut self) {}

    /// The remote hello arrived with the services it offers.
    fn opened(&mut self, _remote_services: Vec<String>) {}
}

type Invocation<C> = Box<dyn FnOnce(&mut C) + Send>;

enum Request<C> {
    Invoke(Invocation<C>),
    Close,
}

/// Handle to a running channel.
pub struct Channel<C> {
    requests: mpsc::UnboundedSender<Request<C>>,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl<C: DispatchCore> Channel<C> {
    /// Start `transport` and spawn the dispatch task owning `core`.
    pub fn spawn<T: Transport>(transport: T, core: C, config: ChannelConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Opening);

        let dispatcher = Dispatcher {
            transport,
            core,
            hello_services: config.hello_services,
            state: state_tx,
            connected: false,
            outbox: VecDeque::new(),
        };
        let task = tokio::spawn(dispatcher.run(EventSender::new(event_tx), event_rx, request_rx));

        Self {
            requests: request_tx,
            state: state_rx,
            task,
        }
    }

    /// Run `f` on the dispatch task. Outgoing messages are drained after it.
    pub fn invoke<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.requests
            .send(Request::Invoke(Box::new(f)))
            .map_err(|_| ChannelError::DispatchGone)
    }

    /// Run `f` on the dispatch task and wait for its result.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut C) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.invoke(move |core| {
            let _ = tx.send(f(core));
        })?;
        rx.await.map_err(|_| ChannelError::DispatchGone)
    }

    /// Ask the channel to close. Buffered output is not flushed.
    pub fn close(&self) {
        let _ = self.requests.send(Request::Close);
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `pred`.
    pub async fn wait_for_state(&self, pred: impl Fn(ChannelState) -> bool) -> ChannelState {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => ChannelState::Closed,
        };
        state
    }

    /// Wait for the dispatch task to finish.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|_| ChannelError::DispatchGone)
    }
}

struct Dispatcher<T, C> {
    transport: T,
    core: C,
    hello_services: Vec<String>,
    state: watch::Sender<ChannelState>,
    connected: bool,
    outbox: VecDeque<Message>,
}

impl<T: Transport, C: DispatchCore> Dispatcher<T, C> {
    async fn run(
        mut self,
        events: EventSender,
        mut event_rx: mpsc::Receiver<TransportEvent>,
        mut request_rx: mpsc::UnboundedReceiver<Request<C>>,
    ) {
        debug!(transport = self.transport.kind(), "channel starting");
        // Held so the queue stays open for the lifetime of the task.
        let _events = events.clone();
        self.transport.start(events);

        let cause = loop {
            let step = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => Err(None),
                },
                request = request_rx.recv() => match request {
                    Some(Request::Invoke(f)) => {
                        f(&mut self.core);
                        Ok(())
                    }
                    Some(Request::Close) | None => {
                        self.set_state(ChannelState::Closing);
                        Err(None)
                    }
                },
            };
            let step = match step {
                Ok(()) => self.pump().await.map_err(Some),
                Err(end) => Err(end),
            };
            if let Err(cause) = step {
                break cause;
            }
        };

        self.terminate(cause).await;
    }

    async fn on_event(&mut self, event: TransportEvent) -> std::result::Result<(), Option<ChannelError>> {
        match event {
            TransportEvent::Connected => {
                self.connected = true;
                if !self.hello_services.is_empty() {
                    let hello = locator::hello(&self.hello_services).map_err(Some)?;
                    self.outbox.push_front(hello);
                }
                self.core.connected();
                Ok(())
            }
            TransportEvent::Message(msg) => {
                self.on_message(msg);
                Ok(())
            }
            TransportEvent::Terminated(cause) => Err(cause),
        }
    }

    fn on_message(&mut self, msg: Message) {
        if !locator::is_hello(&msg) {
            self.core.deliver(msg);
            return;
        }
        if *self.state.borrow() != ChannelState::Opening {
            trace!("dropping repeated hello");
            return;
        }
        let services = match locator::hello_services(msg.args()) {
            Ok(services) => services,
            Err(err) => {
                warn!(error = %err, "malformed hello");
                Vec::new()
            }
        };
        debug!(?services, "channel open");
        self.set_state(ChannelState::Open);
        self.transport.opened();
        self.core.opened(services);
    }

    /// Collect outgoing messages from the core and write them once connected.
    async fn pump(&mut self) -> Result<()> {
        self.outbox.extend(self.core.drain());
        if !self.connected || self.outbox.is_empty() {
            return Ok(());
        }
        while let Some(msg) = self.outbox.pop_front() {
            self.transport.write_message(&msg).await?;
        }
        self.transport.flush().await
    }

    async fn terminate(&mut self, cause: Option<ChannelError>) {
        match &cause {
            Some(err) => warn!(error = %err, "channel terminated"),
            None => debug!("channel closed"),
        }
        if let Err(err) = self.transport.stop().await {
            debug!(error = %err, "transport stop failed");
        }
        self.outbox.clear();
        self.set_state(ChannelState::Closed);
        self.core.terminated(cause.as_ref());
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;

    #[derive(Default)]
    struct Log {
        delivered: Vec<Message>,
        opened: Option<Vec<String>>,
        connected: bool,
        terminated: Option<Option<String>>,
        outgoing: Vec<Message>,
    }

    struct RecordingCore(Arc<Mutex<Log>>);

    impl DispatchCore for RecordingCore {
        fn deliver(&mut self, msg: Message) {
            self.0.lock().unwrap().delivered.push(msg);
        }
        fn drain(&mut self) -> Vec<Message> {
            std::mem::take(&mut self.0.lock().unwrap().outgoing)
        }
        fn terminated(&mut self, cause: Option<&ChannelError>) {
            self.0.lock().unwrap().terminated = Some(cause.map(ToString::to_string));
        }
        fn opened(&mut self, services: Vec<String>) {
            self.0.lock().unwrap().opened = Some(services);
        }
        fn connected(&mut self) {
            self.0.lock().unwrap().connected = true;
        }
    }

    /// Transport whose inbound side is driven by the test.
    struct ScriptedTransport {
        script: Vec<TransportEvent>,
        written: Arc<Mutex<Vec<Message>>>,
        stopped: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn kind(&self) -> &'static str {
            "scripted"
        }
        fn start(&mut self, events: EventSender) {
            let script = std::mem::take(&mut self.script);
            tokio::spawn(async move {
                for event in script {
                    events.send(event).await;
                }
            });
        }
        async fn write_message(&mut self, msg: &Message) -> Result<()> {
            self.written.lock().unwrap().push(msg.clone());
            Ok(())
        }
        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }
    }

    fn remote_hello() -> Message {
        locator::hello(&["Locator".into(), "RunControl".into()]).unwrap()
    }

    #[tokio::test]
    async fn hello_opens_and_messages_are_delivered_in_order() {
        let log = Arc::new(Mutex::new(Log::default()));
        let written = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(false));
        let transport = ScriptedTransport {
            script: vec![
                TransportEvent::Connected,
                TransportEvent::Message(remote_hello()),
                TransportEvent::Message(Message::event("RunControl", "a", Bytes::new())),
                TransportEvent::Message(remote_hello()),
                TransportEvent::Message(Message::event("RunControl", "b", Bytes::new())),
                TransportEvent::Terminated(None),
            ],
            written: Arc::clone(&written),
            stopped: Arc::clone(&stopped),
        };

        let channel = Channel::spawn(
            transport,
            RecordingCore(Arc::clone(&log)),
            ChannelConfig::default(),
        );
        channel.join().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            log.opened,
            Some(vec!["Locator".to_string(), "RunControl".to_string()])
        );
        let names: Vec<_> = log.delivered.iter().filter_map(Message::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(log.terminated, Some(None));

        let written = written.lock().unwrap();
        assert!(locator::is_hello(&written[0]));
        assert!(*stopped.lock().unwrap());
    }

    #[tokio::test]
    async fn outgoing_messages_wait_for_connect() {
        let log = Arc::new(Mutex::new(Log::default()));
        log.lock()
            .unwrap()
            .outgoing
            .push(Message::command("1", "Svc", "early", Bytes::new()));
        let written = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            script: vec![TransportEvent::Connected],
            written: Arc::clone(&written),
            stopped: Arc::new(Mutex::new(false)),
        };

        let channel = Channel::spawn(
            transport,
            RecordingCore(Arc::clone(&log)),
            ChannelConfig {
                hello_services: Vec::new(),
                ..ChannelConfig::default()
            },
        );
        while !channel
            .call(|core| core.0.lock().unwrap().connected)
            .await
            .unwrap()
        {
            tokio::task::yield_now().await;
        }
        channel
            .invoke(|core| {
                core.0
                    .lock()
                    .unwrap()
                    .outgoing
                    .push(Message::command("2", "Svc", "late", Bytes::new()));
            })
            .unwrap();

        let mut rx = channel.subscribe();
        channel.close();
        let _ = rx.wait_for(|s| *s == ChannelState::Closed).await;
        channel.join().await.unwrap();

        let names: Vec<_> = written
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["early", "late"]);
        assert_eq!(log.lock().unwrap().terminated, Some(None));
    }

    #[tokio::test]
    async fn transport_failure_reaches_core() {
        let log = Arc::new(Mutex::new(Log::default()));
        let transport = ScriptedTransport {
            script: vec![TransportEvent::Terminated(Some(ChannelError::Closed))],
            written: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(false)),
        };
        let channel = Channel::spawn(
            transport,
            RecordingCore(Arc::clone(&log)),
            ChannelConfig::default(),
        );
        assert_eq!(
            channel.wait_for_state(|s| s == ChannelState::Closed).await,
            ChannelState::Closed
        );
        channel.join().await.unwrap();
        assert_eq!(
            log.lock().unwrap().terminated,
            Some(Some("channel closed".to_string()))
        );
    }
}
