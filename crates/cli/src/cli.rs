use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use voice_inbox_pipeline::CommandKind;

/// Discord voice inbox to Obsidian journal.
#[derive(Debug, Parser)]
#[command(name = "voice-inbox", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check binaries, the state store and remote API credentials.
    #[command(visible_alias = "check-health")]
    Doctor(OutputArgs),

    /// Fetch new inbox messages and process them.
    #[command(visible_alias = "run-one-cycle")]
    Poll(PollArgs),

    /// Re-drive failed items whose retry time has come.
    #[command(visible_alias = "retry-due-items")]
    Retry(OutputArgs),

    /// Delete expired audio and transcript artifacts.
    #[command(visible_alias = "prune-old-artifacts")]
    Cleanup(OutputArgs),

    /// Summarize stored items and recent runs.
    #[command(visible_alias = "report-status")]
    Status(OutputArgs),
}

#[derive(Debug, Clone, Copy, Default, Args)]
pub struct OutputArgs {
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct PollArgs {
    /// Run a single poll cycle (the only supported mode).
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Doctor(_) => CommandKind::Doctor,
            Command::Poll(_) => CommandKind::Poll,
            Command::Retry(_) => CommandKind::Retry,
            Command::Cleanup(_) => CommandKind::Cleanup,
            Command::Status(_) => CommandKind::Status,
        }
    }

    pub fn json(&self) -> bool {
        match self {
            Command::Poll(args) => args.output.json,
            Command::Doctor(args)
            | Command::Retry(args)
            | Command::Cleanup(args)
            | Command::Status(args) => args.json,
        }
    }

    /// Deadline for every external call made by the command.
    pub fn budget(&self) -> Duration {
        match self.kind() {
            CommandKind::Status => Duration::from_secs(15),
            CommandKind::Doctor => Duration::from_secs(30),
            CommandKind::Poll | CommandKind::Retry => Duration::from_secs(30 * 60),
            CommandKind::Cleanup => Duration::from_secs(10 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("voice-inbox").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn aliases_map_to_commands() {
        for (alias, kind) in [
            ("check-health", CommandKind::Doctor),
            ("run-one-cycle", CommandKind::Poll),
            ("retry-due-items", CommandKind::Retry),
            ("prune-old-artifacts", CommandKind::Cleanup),
            ("report-status", CommandKind::Status),
        ] {
            assert_eq!(parse(&[alias]).command.kind(), kind);
        }
    }

    #[test]
    fn poll_flags_and_budgets() {
        let cli = parse(&["poll", "--once", "--json"]);
        match cli.command {
            Command::Poll(args) => assert!(args.once),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse(&["poll", "--once", "--json"]).command.json());
        assert!(!parse(&["status"]).command.json());

        assert_eq!(parse(&["status"]).command.budget(), Duration::from_secs(15));
        assert_eq!(parse(&["cleanup"]).command.budget(), Duration::from_secs(600));
        assert_eq!(parse(&["retry"]).command.budget(), Duration::from_secs(1800));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(Cli::try_parse_from(["voice-inbox", "serve"]).is_err());
        assert!(Cli::try_parse_from(["voice-inbox"]).is_err());
    }
}
