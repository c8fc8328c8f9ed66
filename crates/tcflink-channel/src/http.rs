//! Messages over HTTP requests plus a server-push event stream.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use tcflink_codec::{
    decode_reply, encode_args, parse_request, Message, ReplyItem, RequestTarget, Token, SSE_PATH,
    STOP_PATH,
};
use tcflink_transport::{ShutdownFlag, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{ChannelError, Result};
use crate::locator::{LOCATOR, SYNC};
use crate::token::TokenGenerator;
use crate::transport::{EventSender, Transport, TransportEvent};

/// Header carrying the session id on every request.
pub const SESSION_HEADER: &str = "X-Session-ID";

const JSON_CONTENT_TYPE: &str = "application/json";
const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Pause before reopening an event stream the remote ended.
const SSE_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Error code used for failures the remote reports on a request.
const ERR_OTHER: u32 = 1;

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Where the remote agent's HTTP endpoint lives.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl HttpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A fresh session id: random UUID plus a process-wide counter.
pub fn new_session_id() -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:x}", Uuid::new_v4(), n)
}

enum Job {
    Send(RequestTarget),
    Sync,
}

/// State shared by the request worker and the event poller.
#[derive(Clone)]
struct Session {
    client: reqwest::Client,
    base_url: String,
    id: String,
    shutdown: ShutdownFlag,
    events: EventSender,
    open: Arc<AtomicBool>,
    sync_pending: Arc<AtomicBool>,
    tokens: Arc<TokenGenerator>,
}

impl Session {
    async fn get(&self, path: &str, content_type: &str) -> std::result::Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(SESSION_HEADER, &self.id)
            .header(CONTENT_TYPE, content_type)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response)
    }

    /// Report a transport failure unless the session was stopped.
    async fn fail(&self, err: TransportError) {
        if let Some(err) = self.shutdown.filter(err) {
            debug!(error = %err, session = %self.id, "HTTP channel failed");
            self.events
                .send(TransportEvent::Terminated(Some(err.into())))
                .await;
        } else {
            self.events.send(TransportEvent::Terminated(None)).await;
        }
    }

    async fn run_requests(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            if self.shutdown.is_tripped() {
                break;
            }
            let (target, sync_token) = match job {
                Job::Send(target) => (target, None),
                Job::Sync => {
                    let token = self.tokens.next_token();
                    let target = RequestTarget {
                        path: format!("/tcf/c/{token}/{LOCATOR}/{SYNC}"),
                        token: Some(token.clone()),
                        query: None,
                    };
                    (target, Some(token))
                }
            };

            let path = target.path_and_query();
            trace!(%path, "HTTP request");
            let body = match self.get(&path, JSON_CONTENT_TYPE).await {
                Ok(response) => response.bytes().await.map_err(TransportError::from),
                Err(err) => Err(err),
            };
            if sync_token.is_some() {
                self.sync_pending.store(false, Ordering::SeqCst);
            }
            match body {
                Ok(body) => {
                    if !self.deliver_reply(&target, sync_token.as_ref(), &body).await {
                        return;
                    }
                }
                Err(err) => {
                    self.fail(err).await;
                    return;
                }
            }
        }
    }

    /// Hand reply items to the dispatch task. Returns `false` once it is gone.
    async fn deliver_reply(
        &self,
        target: &RequestTarget,
        sync_token: Option<&Token>,
        body: &Bytes,
    ) -> bool {
        if body.iter().all(u8::is_ascii_whitespace) {
            return true;
        }
        let items = match decode_reply(body) {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, path = %target.path, "Cannot execute HTTP request");
                return true;
            }
        };
        for item in items {
            let msg = match item {
                ReplyItem::Message(msg) => {
                    if sync_token.is_some() && msg.token() == sync_token && msg.kind().is_reply() {
                        continue;
                    }
                    msg
                }
                ReplyItem::Error(text) => match (&target.token, sync_token) {
                    (_, Some(_)) => {
                        warn!(error = %text, "sync request failed");
                        continue;
                    }
                    (Some(token), None) => match remote_error(token, &text) {
                        Ok(msg) => msg,
                        Err(err) => {
                            warn!(error = %err, "cannot encode remote error");
                            continue;
                        }
                    },
                    (None, None) => {
                        warn!(error = %text, path = %target.path, "Cannot execute HTTP request");
                        continue;
                    }
                },
            };
            if !self.events.send(TransportEvent::Message(msg)).await {
                return false;
            }
        }
        true
    }

    async fn run_events(self, jobs: mpsc::UnboundedSender<Job>) {
        while !self.shutdown.is_tripped() {
            let response = match self.get(SSE_PATH, SSE_CONTENT_TYPE).await {
                Ok(response) => response,
                Err(err) => return self.fail(err).await,
            };
            let mut stream = response.bytes_stream();
            let mut lines = BlankLines::default();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => return self.fail(err.into()).await,
                };
                if lines.feed(&chunk) > 0 {
                    self.request_sync(&jobs);
                }
            }
            trace!(session = %self.id, "event stream ended, reopening");
            tokio::time::sleep(SSE_RECONNECT_DELAY).await;
        }
    }

    /// Queue a sync unless one is outstanding or the channel is not open yet.
    fn request_sync(&self, jobs: &mpsc::UnboundedSender<Job>) {
        if !self.open.load(Ordering::SeqCst) {
            return;
        }
        if self.sync_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(session = %self.id, "event stream activity, syncing");
        if jobs.send(Job::Sync).is_err() {
            self.sync_pending.store(false, Ordering::SeqCst);
        }
    }
}

/// Counts blank lines on the event stream across chunk boundaries.
///
/// Line content is never kept; only whether the current line has any.
#[derive(Debug, Default)]
struct BlankLines {
    nonblank: bool,
}

impl BlankLines {
    fn feed(&mut self, chunk: &[u8]) -> usize {
        let mut blank = 0;
        for &b in chunk {
            match b {
                b'\n' => {
                    if !self.nonblank {
                        blank += 1;
                    }
                    self.nonblank = false;
                }
                b'\r' => {}
                _ => self.nonblank = true,
            }
        }
        blank
    }
}

/// Result message carrying a remote error in its first argument slot.
fn remote_error(token: &Token, text: &str) -> Result<Message> {
    let error = json!({ "Code": ERR_OTHER, "Format": text });
    Ok(Message::result(token.clone(), encode_args(&[error])?))
}

/// HTTP binding.
///
/// Each outgoing command or event becomes one GET; replies are JSON arrays.
/// A long-lived GET on the event stream triggers a `Locator.sync` whenever
/// the remote signals activity with a blank line.
pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
    session_id: String,
    wr_buf: BytesMut,
    shutdown: ShutdownFlag,
    open: Arc<AtomicBool>,
    sync_pending: Arc<AtomicBool>,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    tasks: Vec<JoinHandle<()>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: HttpConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            session_id: new_session_id(),
            wr_buf: BytesMut::with_capacity(0x1000),
            shutdown: ShutdownFlag::new(),
            open: Arc::new(AtomicBool::new(false)),
            sync_pending: Arc::new(AtomicBool::new(false)),
            jobs: None,
            tasks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn start(&mut self, events: EventSender) {
        if self.jobs.is_some() {
            return;
        }
        let session = Session {
            client: self.client.clone(),
            base_url: self.config.base_url(),
            id: self.session_id.clone(),
            shutdown: self.shutdown.clone(),
            events: events.clone(),
            open: Arc::clone(&self.open),
            sync_pending: Arc::clone(&self.sync_pending),
            tokens: Arc::new(TokenGenerator::with_prefix("sync-")),
        };
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        self.tasks
            .push(tokio::spawn(session.clone().run_requests(jobs_rx)));
        self.tasks
            .push(tokio::spawn(session.run_events(jobs_tx.clone())));
        self.jobs = Some(jobs_tx);
        debug!(url = %self.config.base_url(), session = %self.session_id, "HTTP channel started");

        tokio::spawn(async move {
            events.send(TransportEvent::Connected).await;
        });
    }

    fn opened(&mut self) {
        self.open.store(true, Ordering::SeqCst);
    }

    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        if self.shutdown.is_tripped() {
            return Ok(());
        }
        msg.encode(&mut self.wr_buf);
        let parsed = parse_request(&self.wr_buf);
        self.wr_buf.clear();
        let Some(target) = parsed? else {
            trace!(kind = %msg.kind(), "not sent over HTTP");
            return Ok(());
        };
        let jobs = self.jobs.as_ref().ok_or(ChannelError::Closed)?;
        jobs.send(Job::Send(target))
            .map_err(|_| ChannelError::Closed)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.shutdown.trip() {
            return Ok(());
        }
        self.jobs = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let url = format!("{}{}", self.config.base_url(), STOP_PATH);
        let result = self
            .client
            .get(&url)
            .header(SESSION_HEADER, &self.session_id)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .send()
            .await;
        match result {
            Ok(response) => debug!(status = %response.status(), "HTTP session stopped"),
            Err(err) => debug!(error = %err, "stop request failed"),
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_span_chunks() {
        let mut lines = BlankLines::default();
        assert_eq!(lines.feed(b"data: x\n\r"), 0);
        assert_eq!(lines.feed(b"\n"), 1);
        assert_eq!(lines.feed(b"\n\nid: 3\n"), 2);
    }

    #[test]
    fn long_lines_are_not_buffered() {
        let mut lines = BlankLines::default();
        let long = vec![b'x'; 1 << 20];
        for _ in 0..4 {
            assert_eq!(lines.feed(&long), 0);
        }
        assert_eq!(lines.feed(b"\n"), 0);
        assert_eq!(lines.feed(b"\r\n"), 1);
    }

    #[test]
    fn session_ids_are_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        let (uuid, counter) = a.rsplit_once('-').unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
        assert!(u32::from_str_radix(counter, 16).is_ok());
    }

    #[test]
    fn remote_error_fills_first_slot() {
        let msg = remote_error(&Token::from("4"), "No such service").unwrap();
        assert_eq!(
            msg.args().as_ref(),
            br#"{"Code":1,"Format":"No such service"}"#
                .iter()
                .copied()
                .chain([0])
                .collect::<Vec<_>>()
                .as_slice()
        );
    }

    #[test]
    fn base_url() {
        assert_eq!(HttpConfig::new("localhost", 8080).base_url(), "http://localhost:8080");
    }
}
