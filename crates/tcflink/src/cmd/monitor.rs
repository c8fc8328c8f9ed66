use crate::cmd::{
    close, parse_duration, runtime, wait_open, ClientCore, Inbound, MonitorArgs, Target,
};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = parse_duration(&args.timeout)?;
    let target = Target::parse(&args.target, args.http)?;
    let peer = target.label();

    runtime()?.block_on(async move {
        let (core, mut inbound) = ClientCore::new();
        let channel = target.open(core, limit);
        let services = wait_open(&mut inbound, limit).await?;
        tracing::info!(%peer, ?services, "monitoring");

        let mut printed = 0usize;
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(Inbound::Message(msg)) => {
                        print_message(&msg, &peer, format);
                        printed = printed.saturating_add(1);
                        if args.count.is_some_and(|count| printed >= count) {
                            break;
                        }
                    }
                    Some(Inbound::Opened(_)) => {}
                    Some(Inbound::Terminated(None)) => return Ok(SUCCESS),
                    Some(Inbound::Terminated(Some(err))) => return Err(err),
                    None => return Err(CliError::new(INTERNAL, "dispatch task is gone")),
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    break;
                }
            }
        }

        close(channel, limit).await;
        Ok(SUCCESS)
    })
}
