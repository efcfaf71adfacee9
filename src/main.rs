use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use channel_agent::agent::channels::{parse_channel_list, ChannelStore};
use channel_agent::agent::config::Config;
use channel_agent::agent::daemon;
use channel_agent::commands::Ledger;
use channel_agent::utils;

#[derive(Parser)]
#[command(name = "channel-agent", version, about = "Channel-subscribed remote command agent")]
struct AppCli {
    /// Run in daemon mode (background)
    #[arg(long)]
    daemon: bool,

    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and execute pushed commands (default)
    Run,
    /// Inspect or change the subscribed channels
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },
    /// Inspect the executed-command ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand)]
enum ChannelAction {
    /// Print the persisted channel list
    Show,
    /// Replace the channel list, e.g. `floor3,lab`
    Set { channels: String },
    /// Delete the persisted channel list
    Reset,
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Print every ledger entry
    Show,
}

fn run_daemon() -> Result<()> {
    use daemonize::Daemonize;
    let daemonize = Daemonize::new()
        .pid_file("channel-agent.pid")
        .working_directory(".")
        .umask(0o027)
        .privileged_action(|| {
            info!("daemon started");
        });

    daemonize.start().map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn main() -> Result<()> {
    let args = AppCli::parse();
    let config = Config::load(&args.config)?;
    utils::logging::init(&config.log_level);

    match args.command {
        None | Some(Commands::Run) => {
            // fork before any runtime threads exist
            if args.daemon {
                run_daemon()?;
            }
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(daemon::run(config))?;
        }
        Some(Commands::Channel { action }) => {
            let store = ChannelStore::new(config.channel_path());
            match action {
                ChannelAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&store.current())?);
                }
                ChannelAction::Set { channels } => {
                    let channels = parse_channel_list(&channels);
                    if channels.is_empty() {
                        warn!("no valid channel names given, nothing changed");
                    } else {
                        store.set(&channels)?;
                    }
                }
                ChannelAction::Reset => store.reset()?,
            }
        }
        Some(Commands::Ledger {
            action: LedgerAction::Show,
        }) => {
            let ledger = Ledger::load(config.ledger_path());
            println!("{}", serde_json::to_string_pretty(ledger.entries())?);
        }
    }

    Ok(())
}
