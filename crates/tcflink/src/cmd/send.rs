use bytes::Bytes;
use serde_json::Value;
use tcflink_channel::TokenGenerator;
use tcflink_codec::{decode_args, encode_args, Message, Token};
use tokio::sync::mpsc;

use crate::cmd::{
    close, parse_duration, runtime, wait_open, ClientCore, Inbound, SendArgs, Target,
};
use crate::exit::{codec_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = parse_duration(&args.timeout)?;
    let target = Target::parse(&args.target, args.http)?;
    let payload = resolve_args(&args.args)?;

    runtime()?.block_on(async move {
        let (core, mut inbound) = ClientCore::new();
        let channel = target.open(core, limit);
        let services = wait_open(&mut inbound, limit).await?;
        tracing::debug!(peer = %target.label(), ?services, "channel open");

        let token = TokenGenerator::new().next_token();
        let command = Message::command(token.clone(), args.service, args.command, payload);
        channel
            .invoke(move |core| core.outgoing.push(command))
            .map_err(|err| CliError::new(INTERNAL, format!("send failed: {err}")))?;

        let reply = tokio::time::timeout(limit, wait_for_result(&mut inbound, &token))
            .await
            .unwrap_or_else(|_| {
                Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {limit:?}"),
                ))
            });
        close(channel, limit).await;
        let reply = reply?;

        print_message(&reply, &target.label(), format);
        Ok(reply_code(&reply))
    })
}

fn resolve_args(raw: &[String]) -> CliResult<Bytes> {
    let values = raw
        .iter()
        .map(|text| {
            serde_json::from_str::<Value>(text)
                .map_err(|err| CliError::new(USAGE, format!("--args is not valid JSON: {err}")))
        })
        .collect::<CliResult<Vec<_>>>()?;
    encode_args(&values).map_err(|err| codec_error("argument encoding failed", &err))
}

/// Wait for the result carrying `token`; progress replies and events are skipped.
async fn wait_for_result(
    inbound: &mut mpsc::UnboundedReceiver<Inbound>,
    token: &Token,
) -> CliResult<Message> {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Message(msg @ Message::Result { .. }) if msg.token() == Some(token) => {
                return Ok(msg);
            }
            Inbound::Message(msg) => tracing::debug!(%msg, "skipping message"),
            Inbound::Opened(_) => {}
            Inbound::Terminated(cause) => {
                return Err(cause
                    .unwrap_or_else(|| CliError::new(FAILURE, "channel closed before reply")));
            }
        }
    }
    Err(CliError::new(INTERNAL, "dispatch task is gone"))
}

/// Results put a remote error object in the first slot; anything else is success.
fn reply_code(reply: &Message) -> i32 {
    let first = decode_args(reply.args())
        .ok()
        .and_then(|values| values.into_iter().next());
    match first {
        Some(Value::Object(error)) if error.contains_key("Format") || error.contains_key("Code") => {
            FAILURE
        }
        _ => SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn args_are_encoded_in_order() {
        let bytes = resolve_args(&["\"ping\"".to_string(), "[1,2]".to_string()]).unwrap();
        assert_eq!(bytes.as_ref(), b"\"ping\"\0[1,2]\0");
    }

    #[test]
    fn invalid_json_argument_is_usage_error() {
        let err = resolve_args(&["{oops".to_string()]).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn error_object_in_first_slot_fails() {
        let ok = Message::result("1", encode_args(&[json!(null), json!("pong")]).unwrap());
        assert_eq!(reply_code(&ok), SUCCESS);

        let failed = Message::result(
            "2",
            encode_args(&[json!({"Code": 1, "Format": "No such service"})]).unwrap(),
        );
        assert_eq!(reply_code(&failed), FAILURE);
    }

    #[tokio::test]
    async fn result_is_matched_by_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Inbound::Message(Message::event("X", "y", Bytes::new())))
            .unwrap();
        tx.send(Inbound::Message(Message::result("other", Bytes::new())))
            .unwrap();
        tx.send(Inbound::Message(Message::result("mine", Bytes::new())))
            .unwrap();

        let reply = wait_for_result(&mut rx, &Token::from("mine")).await.unwrap();
        assert_eq!(reply.token(), Some(&Token::from("mine")));
    }

    #[tokio::test]
    async fn termination_before_reply_is_an_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Inbound::Terminated(None)).unwrap();
        let err = wait_for_result(&mut rx, &Token::from("1")).await.unwrap_err();
        assert_eq!(err.code, FAILURE);
    }
}
