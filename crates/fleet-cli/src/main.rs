mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{add::AddArgs, config::ConfigSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fleet",
    about = "Scaffold, register and run a fleet of small network services",
    version,
    propagate_version = true
)]
struct Cli {
    /// Fleet root (default: nearest ancestor holding fleet.yaml or services.json)
    #[arg(long, global = true, env = "FLEET_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create fleet.yaml, services.json, .env and the control scripts if missing
    Init,

    /// Scaffold a new service and register it
    Add(AddArgs),

    /// List every descriptor in the log, duplicates included
    List,

    /// Show which process owns each registered port
    Status,

    /// Bring up dependencies and launch every registered service
    Start,

    /// Tear down dependencies and kill whatever listens on registered ports
    Stop,

    /// Stop, then start
    Restart,

    /// Inspect the fleet configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Add(args) => cmd::add::run(&root, args, cli.json),
        Commands::List => cmd::list::run(&root, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Start => cmd::lifecycle::start(&root, cli.json),
        Commands::Stop => cmd::lifecycle::stop(&root, cli.json),
        Commands::Restart => cmd::lifecycle::restart(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
