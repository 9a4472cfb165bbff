use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use routines_common::logging::init_logging;
use routines_console::client::{DEFAULT_URL, parse_cli_args};
use routines_console::{ConsoleSession, PlainOutput, RoutinesClient, RunOutcome, ScrollView, tui};
use std::io::IsTerminal;

/// Runs routines on a routines server and shows their progress.
#[derive(Parser, Debug)]
#[command(name = "routines_console")]
#[command(version, about)]
struct Cli {
    /// Base URL of the routines server.
    #[arg(long, global = true, env = "ROUTINES_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the routines the server offers.
    List,
    /// Run a routine and follow its output.
    Run {
        /// Action key, as shown by `list`.
        action: String,

        /// Arguments as JSON. An array is spread into positional arguments.
        #[arg(long)]
        args: Option<String>,

        /// Print the final output instead of opening the full-screen view.
        #[arg(long)]
        plain: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = RoutinesClient::parse(&cli.url)?;

    match cli.command {
        Command::List => {
            init_logging("routines_console", &cli.log_level, false)?;
            list(&client).await
        }
        Command::Run {
            action,
            args,
            plain,
        } => {
            let args = parse_cli_args(args.as_deref());
            if plain || !std::io::stdout().is_terminal() {
                init_logging("routines_console", &cli.log_level, false)?;
                run_plain(client, &action, &args).await
            } else {
                // Anything written to stderr would tear the alternate screen.
                init_logging("routines_console", &cli.log_level, true)?;
                let session = ConsoleSession::new(client, ScrollView::new());
                let runtime = tokio::runtime::Handle::current();
                tokio::task::spawn_blocking(move || tui::run(session, runtime, &action, &args))
                    .await?
            }
        }
    }
}

async fn list(client: &RoutinesClient) -> anyhow::Result<()> {
    let groups = client.list().await?;
    if groups.is_empty() {
        println!("No routines are registered on {}", client.base_url());
        return Ok(());
    }
    for group in groups {
        println!("{}", group.name.bold());
        for task in group.tasks {
            println!("  {:<32} {}", task.title, task.action.dimmed());
        }
    }
    Ok(())
}

async fn run_plain(
    client: RoutinesClient,
    action: &str,
    args: &[serde_json::Value],
) -> anyhow::Result<()> {
    let session = ConsoleSession::new(client, PlainOutput::default());

    let stopper = session.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });
    let outcome = session.run(action, args).await;
    ctrl_c.abort();

    print!("{}", session.output().text());
    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Stopped => {
            eprintln!("{}", "Stopped".yellow());
            Ok(())
        }
        RunOutcome::Failed(e) => {
            eprintln!("{}", "Run failed".red());
            Err(e.into())
        }
    }
}
