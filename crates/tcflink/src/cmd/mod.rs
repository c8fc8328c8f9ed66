use std::time::Duration;

use clap::{Args, Subcommand};
use tcflink_channel::{
    Channel, ChannelConfig, ChannelError, DispatchCore, HttpConfig, HttpTransport,
    SocketTransport, Transport,
};
use tcflink_codec::Message;
use tcflink_transport::SocketConfig;
use tokio::sync::mpsc;

use crate::exit::{channel_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod agent;
pub mod monitor;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a loopback agent that echoes commands back as results.
    Agent(AgentArgs),
    /// Send one command and print its result.
    Send(SendArgs),
    /// Print messages arriving from an agent.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Agent(args) => agent::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Address to listen on (e.g. 127.0.0.1:1534).
    pub addr: String,
    /// Services announced in the hello (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "Locator")]
    pub services: Vec<String>,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Agent address as host:port.
    pub target: String,
    /// Service name.
    pub service: String,
    /// Command name.
    pub command: String,
    /// One JSON argument; repeat for several.
    #[arg(long = "args", value_name = "JSON")]
    pub args: Vec<String>,
    /// Talk to the agent's HTTP endpoint instead of a raw socket.
    #[arg(long)]
    pub http: bool,
    /// Time allowed for connect, hello and reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Agent address as host:port.
    pub target: String,
    /// Talk to the agent's HTTP endpoint instead of a raw socket.
    #[arg(long)]
    pub http: bool,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Time allowed for connect and hello (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// What the dispatch task reports back to a command.
#[derive(Debug)]
pub enum Inbound {
    Opened(Vec<String>),
    Message(Message),
    Terminated(Option<CliError>),
}

/// Core shared by the client commands: forwards everything to the caller.
pub struct ClientCore {
    pub outgoing: Vec<Message>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl ClientCore {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: Vec::new(),
                inbound: tx,
            },
            rx,
        )
    }
}

impl DispatchCore for ClientCore {
    fn deliver(&mut self, msg: Message) {
        let _ = self.inbound.send(Inbound::Message(msg));
    }

    fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }

    fn terminated(&mut self, cause: Option<&ChannelError>) {
        let cause = cause.map(|err| channel_error("channel failed", err));
        let _ = self.inbound.send(Inbound::Terminated(cause));
    }

    fn opened(&mut self, remote_services: Vec<String>) {
        let _ = self.inbound.send(Inbound::Opened(remote_services));
    }
}

/// A parsed `host:port` plus the binding to reach it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub http: bool,
}

impl Target {
    pub fn parse(input: &str, http: bool) -> CliResult<Self> {
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| CliError::new(USAGE, format!("expected host:port, got {input}")))?;
        let port = port
            .parse()
            .map_err(|_| CliError::new(USAGE, format!("invalid port in {input}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(CliError::new(USAGE, format!("missing host in {input}")));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            http,
        })
    }

    /// Peer label for output, e.g. `tcp:127.0.0.1:1534`.
    pub fn label(&self) -> String {
        let scheme = if self.http { "http" } else { "tcp" };
        format!("{scheme}:{}:{}", self.host, self.port)
    }

    pub fn open(&self, core: ClientCore, connect_timeout: Duration) -> Channel<ClientCore> {
        let transport: Box<dyn Transport> = if self.http {
            Box::new(HttpTransport::new(HttpConfig::new(&self.host, self.port)))
        } else {
            let mut config = SocketConfig::new(&self.host, self.port);
            config.connect_timeout = Some(connect_timeout);
            Box::new(SocketTransport::new(config))
        };
        Channel::spawn(transport, core, ChannelConfig::default())
    }
}

/// Wait for the remote hello. Other inbound traffic before it is dropped.
pub async fn wait_open(
    inbound: &mut mpsc::UnboundedReceiver<Inbound>,
    limit: Duration,
) -> CliResult<Vec<String>> {
    let opened = tokio::time::timeout(limit, async {
        while let Some(event) = inbound.recv().await {
            match event {
                Inbound::Opened(services) => return Ok(services),
                Inbound::Terminated(cause) => {
                    return Err(cause.unwrap_or_else(|| {
                        CliError::new(crate::exit::FAILURE, "channel closed before hello")
                    }))
                }
                Inbound::Message(_) => {}
            }
        }
        Err(CliError::new(INTERNAL, "dispatch task is gone"))
    })
    .await;
    opened.unwrap_or_else(|_| {
        Err(CliError::new(
            crate::exit::TIMEOUT,
            format!("no hello from agent within {limit:?}"),
        ))
    })
}

/// Close `channel` and wait for the dispatch task to finish tearing down the
/// transport, so an HTTP session still gets its stop request.
pub async fn close(channel: Channel<ClientCore>, limit: Duration) {
    channel.close();
    match tokio::time::timeout(limit, channel.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(error = %err, "dispatch task ended abnormally"),
        Err(_) => tracing::debug!("channel close timed out"),
    }
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| crate::exit::io_error("runtime setup failed", &err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
