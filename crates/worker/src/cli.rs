use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatlog: queue-fed chat archive workers",
    long_about = None
)]
pub struct Cli {
    /// TOML config file; CHATLOG_* environment variables override it.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(about = "Append new and edited messages from the insert queue")]
    Insert,

    #[command(about = "Reconcile user and group observations from the entity queue")]
    Entity,

    #[command(about = "Flag deleted messages from the mark queue")]
    Mark,

    #[command(about = "Store group invite links from the invite queue")]
    Invite,

    #[command(
        about = "Show last poll time and backlog of every worker",
        after_help = "EXAMPLES:\n    chatlog-worker status\n\n    # Emit machine-readable output\n    chatlog-worker status --json"
    )]
    Status {
        /// Emit JSON output instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_worker_subcommands() {
        for (arg, command) in [
            ("insert", Command::Insert),
            ("entity", Command::Entity),
            ("mark", Command::Mark),
            ("invite", Command::Invite),
        ] {
            let cli = Cli::try_parse_from(["chatlog-worker", arg]).unwrap();
            assert_eq!(cli.command, command);
            assert!(cli.config.is_none());
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli =
            Cli::try_parse_from(["chatlog-worker", "mark", "--config", "/etc/chatlog.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/chatlog.toml")));
    }

    #[test]
    fn status_takes_json_flag() {
        let cli = Cli::try_parse_from(["chatlog-worker", "status", "--json"]).unwrap();
        assert_eq!(cli.command, Command::Status { json: true });
    }

    #[test]
    fn ocr_is_not_a_worker_command() {
        assert!(Cli::try_parse_from(["chatlog-worker", "ocr"]).is_err());
        assert!(Cli::try_parse_from(["chatlog-worker"]).is_err());
    }
}
