mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "tcflink", version, about = "Framed message channels to TCF-style agents")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_repeated_args() {
        let cli = Cli::try_parse_from([
            "tcflink",
            "send",
            "127.0.0.1:1534",
            "Diagnostics",
            "echo",
            "--args",
            "\"ping\"",
            "--args",
            "[1,2]",
            "--http",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.service, "Diagnostics");
                assert_eq!(args.command, "echo");
                assert_eq!(args.args, vec!["\"ping\"", "[1,2]"]);
                assert!(args.http);
                assert_eq!(args.timeout, "5s");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn send_requires_service_and_command() {
        let err = Cli::try_parse_from(["tcflink", "send", "127.0.0.1:1534"])
            .expect_err("missing positionals should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_agent_services_list() {
        let cli = Cli::try_parse_from([
            "tcflink",
            "agent",
            "127.0.0.1:0",
            "--services",
            "Locator,Diagnostics",
            "--count",
            "1",
        ])
        .expect("agent args should parse");
        match cli.command {
            Command::Agent(args) => {
                assert_eq!(args.services, vec!["Locator", "Diagnostics"]);
                assert_eq!(args.count, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tcflink",
            "monitor",
            "localhost:1534",
            "--count",
            "3",
            "--format",
            "pretty",
            "--log-format",
            "json",
        ])
        .expect("monitor args should parse");
        assert_eq!(cli.format, Some(OutputFormat::Pretty));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Command::Monitor(_)));
    }
}
