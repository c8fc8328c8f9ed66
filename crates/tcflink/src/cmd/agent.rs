use std::io::{Read, Write};
use std::net::TcpListener;

use serde_json::Value;
use tcflink_channel::locator::{self, LOCATOR, SYNC};
use tcflink_codec::{encode_args, read_message, write_message, Message};
use tcflink_frame::{FrameReader, FrameWriter};
use tcflink_transport::ShutdownFlag;
use tracing::{debug, info, warn};

use crate::cmd::AgentArgs;
use crate::exit::{channel_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: AgentArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = TcpListener::bind(&args.addr).map_err(|err| io_error("bind failed", &err))?;
    let hello = locator::hello(&args.services)
        .map_err(|err| channel_error("hello encoding failed", &err))?;

    let running = ShutdownFlag::new();
    install_ctrlc_handler(running.clone())?;
    info!(addr = %args.addr, services = ?args.services, "agent listening");

    let mut served = 0usize;
    while !running.is_tripped() {
        let (stream, peer) = listener
            .accept()
            .map_err(|err| io_error("accept failed", &err))?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "TCP_NODELAY not set");
        }
        let reader = stream
            .try_clone()
            .map_err(|err| io_error("socket clone failed", &err))?;

        info!(%peer, "client connected");
        match serve(reader, stream, &hello, &running) {
            Ok(commands) => info!(%peer, commands, "client disconnected"),
            Err(err) => warn!(%peer, error = %err, "client connection failed"),
        }

        served = served.saturating_add(1);
        if args.count.is_some_and(|count| served >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

/// Serve one client: send the hello, then answer commands until end of stream.
/// Returns the number of commands answered.
fn serve<R: Read, W: Write>(
    reader: R,
    writer: W,
    hello: &Message,
    shutdown: &ShutdownFlag,
) -> tcflink_codec::Result<usize> {
    let mut reader = FrameReader::new(reader).with_shutdown(shutdown.clone());
    let mut writer = FrameWriter::new(writer).with_shutdown(shutdown.clone());

    write_message(&mut writer, hello)?;
    writer.flush()?;

    let mut answered = 0usize;
    while let Some(msg) = read_message(&mut reader)? {
        let Some(reply) = respond(&msg)? else {
            debug!(%msg, "ignoring message");
            continue;
        };
        write_message(&mut writer, &reply)?;
        writer.flush()?;
        answered += 1;
    }
    Ok(answered)
}

/// `Locator.sync` is answered with a null result; every other command is echoed.
fn respond(msg: &Message) -> tcflink_codec::Result<Option<Message>> {
    let Message::Command {
        token,
        service,
        name,
        args,
    } = msg
    else {
        return Ok(None);
    };
    if service == LOCATOR && name == SYNC {
        return Ok(Some(Message::result(
            token.clone(),
            encode_args(&[Value::Null])?,
        )));
    }
    Ok(Some(Message::result(token.clone(), args.clone())))
}

fn install_ctrlc_handler(running: ShutdownFlag) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.trip();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
