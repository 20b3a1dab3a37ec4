#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "xpt: XP leaderboard tracker",
    long_about = "Collect leaderboard snapshots into a local SQLite store, compact old history, rank active members and project when targets will be reached."
)]
struct Cli {
    /// Database file (overrides `database.path` and XPT_DB).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Config file (default: `<config dir>/xptrack/config.toml`).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create or migrate the store",
        long_about = "Create the SQLite store (and its directory) or migrate an existing one to the current schema.",
        after_help = "EXAMPLES:\n    # Initialize the default store\n    xpt init\n\n    # Initialize a store at a custom path\n    xpt --db ./data/xp.sqlite3 init"
    )]
    Init,

    #[command(
        next_help_heading = "Collection",
        about = "Run one collection cycle",
        long_about = "Fetch leaderboard pages and record every member's XP, unless the last collection is too recent.",
        after_help = "EXAMPLES:\n    # Sweep the largest configured page range\n    xpt collect\n\n    # Sweep only the first pages\n    xpt collect --small\n\n    # Sweep pages 1..=4 and emit JSON\n    xpt collect --pages 4 --json"
    )]
    Collect(cmd::collect::CollectArgs),

    #[command(
        next_help_heading = "Collection",
        about = "Refresh or list display profiles",
        long_about = "Refresh names, colors and avatars from the API without recording XP, or list stored profiles.",
        after_help = "EXAMPLES:\n    # Refresh profiles\n    xpt profiles\n\n    # List stored profiles with their XP\n    xpt profiles --list"
    )]
    Profiles(cmd::profiles::ProfilesArgs),

    #[command(
        next_help_heading = "Collection",
        about = "Collect continuously",
        long_about = "Alternate large and small sweeps, lengthening the wait after successes and shortening it after failures.",
        after_help = "EXAMPLES:\n    # Run until interrupted\n    xpt watch\n\n    # Run two sweeps and stop\n    xpt watch --iterations 2 --json"
    )]
    Watch(cmd::watch::WatchArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Show store and collection status",
        after_help = "EXAMPLES:\n    # Show status\n    xpt status\n\n    # Emit machine-readable output\n    xpt status --json"
    )]
    Status,

    #[command(
        next_help_heading = "Maintenance",
        about = "Compact redundant history",
        long_about = "Plan deletion of redundant records (dense or flat stretches of old history). Nothing is deleted without --yes.",
        after_help = "EXAMPLES:\n    # Show what would be deleted\n    xpt reduce\n\n    # Delete it\n    xpt reduce --yes"
    )]
    Reduce(cmd::reduce::ReduceArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Manage XP events",
        after_help = "EXAMPLES:\n    # Start a double XP event\n    xpt event start --multiplier 2\n\n    # End it\n    xpt event end\n\n    # List events\n    xpt event list"
    )]
    Event {
        #[command(subcommand)]
        command: cmd::event::EventCommand,
    },

    #[command(
        next_help_heading = "Analysis",
        about = "Project when a subject reaches a target",
        long_about = "Project days until a subject reaches an XP value, a level, or another subject, using the subject's recent growth.",
        after_help = "EXAMPLES:\n    # Days until 100k XP\n    xpt predict 1234 100k\n\n    # Days until level 50, using 14 days of history\n    xpt predict 1234 \"lvl 50\" --days 14\n\n    # Days until overtaking another member at 500 XP/day\n    xpt predict 1234 \"<@5678>\" --growth 500"
    )]
    Predict(cmd::predict::PredictArgs),

    #[command(
        next_help_heading = "Analysis",
        about = "Leaderboard of active subjects",
        long_about = "Rank subjects whose XP grew by more than a threshold within the window, by current XP.",
        after_help = "EXAMPLES:\n    # First page of the weekly active leaderboard\n    xpt rank\n\n    # One subject's position over the last 30 days\n    xpt rank 1234 --days 30\n\n    # Second page with a higher activity bar\n    xpt rank --threshold 500 --page 2"
    )]
    Rank(cmd::rank::RankArgs),

    #[command(
        next_help_heading = "Analysis",
        about = "Top subjects by XP or growth",
        after_help = "EXAMPLES:\n    # Top 10 by XP\n    xpt top\n\n    # Top 20 by growth over the last 30 days\n    xpt top --growth --days 30 --limit 20"
    )]
    Top(cmd::top::TopArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    xpt completions bash\n\n    # Generate zsh completions\n    xpt completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("XPT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "xptrack_core=debug,xpt=debug,info"
        } else {
            "xptrack_core=info,xpt=info,warn"
        })
    });

    let format = env::var("XPT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let ctx = cmd::Context::load(cli.config.as_deref(), cli.db.as_deref(), output)?;
    debug!(command = ?cli.command, "dispatching");

    match &cli.command {
        Commands::Init => cmd::init::run_init(&ctx),
        Commands::Collect(args) => cmd::collect::run_collect(args, &ctx),
        Commands::Profiles(args) => cmd::profiles::run_profiles(args, &ctx),
        Commands::Watch(args) => cmd::watch::run_watch(args, &ctx),
        Commands::Status => cmd::status::run_status(&ctx),
        Commands::Reduce(args) => cmd::reduce::run_reduce(args, &ctx),
        Commands::Event { command } => cmd::event::run_event(command, &ctx),
        Commands::Predict(args) => cmd::predict::run_predict(args, &ctx),
        Commands::Rank(args) => cmd::rank::run_rank(args, &ctx),
        Commands::Top(args) => cmd::top::run_top(args, &ctx),
        Commands::Completions(_) => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();

    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = output::render_failure(output, &err);
            ExitCode::from(u8::try_from(status).unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_sets_output_mode() {
        let cli = Cli::parse_from(["xpt", "--json", "status"]);
        assert!(cli.json);
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["xpt", "status", "--db", "/tmp/x.sqlite3", "--json"]);
        assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/x.sqlite3")));
        assert!(cli.output_mode().is_json());
    }

    #[test]
    fn collect_sweep_flags_conflict() {
        assert!(Cli::try_parse_from(["xpt", "collect", "--small", "--large"]).is_err());
        assert!(Cli::try_parse_from(["xpt", "collect", "--small", "--pages", "3"]).is_err());
        assert!(Cli::try_parse_from(["xpt", "collect", "--pages", "0"]).is_err());
    }

    #[test]
    fn predict_takes_subject_and_target() {
        let cli = Cli::parse_from(["xpt", "predict", "<@42>", "lvl 40", "--days", "14"]);
        match cli.command {
            Commands::Predict(args) => {
                assert_eq!(args.subject, "<@42>");
                assert_eq!(args.target, "lvl 40");
                assert_eq!(args.days, Some(14));
                assert_eq!(args.growth, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn event_start_accepts_rfc3339() {
        let cli = Cli::parse_from([
            "xpt",
            "event",
            "start",
            "--at",
            "2025-06-01T00:00:00Z",
            "--multiplier",
            "2",
        ]);
        match cli.command {
            Commands::Event {
                command: cmd::event::EventCommand::Start(args),
            } => {
                assert!(args.at.is_some());
                assert_eq!(args.multiplier, Some(2.0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["xpt", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Commands::Completions(cmd::completions::CompletionsArgs {
                shell: clap_complete::Shell::Bash,
            })
        ));
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["xpt", "init"],
            vec!["xpt", "collect"],
            vec!["xpt", "collect", "--large"],
            vec!["xpt", "profiles", "--list"],
            vec!["xpt", "watch", "--iterations", "1"],
            vec!["xpt", "status"],
            vec!["xpt", "reduce", "--yes"],
            vec!["xpt", "event", "end"],
            vec!["xpt", "event", "list", "--days", "7"],
            vec!["xpt", "predict", "1", "+5"],
            vec!["xpt", "rank", "1", "--threshold", "10"],
            vec!["xpt", "rank", "--page", "2"],
            vec!["xpt", "top", "--growth", "--limit", "3"],
            vec!["xpt", "completions", "zsh"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "failed to parse {args:?}: {:?}", result.err());
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
