use clap::{Arg, Command};
use tracing_subscriber::EnvFilter;

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("ace")
        .version(VERSION)
        .about("ACE - evolve a playbook of strategies from execution feedback")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("adapt")
                .about("Run an adaptation loop over a dataset")
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_name("MODE")
                        .value_parser(["offline", "online"])
                        .required(true)
                        .help("offline: multi-epoch training; online: per-sample test-time refinement"),
                )
                .arg(
                    Arg::new("dataset")
                        .long("dataset")
                        .value_name("PATH")
                        .required(true)
                        .help("Samples as a JSON array or JSONL of {query, context?, ground_truth?}"),
                )
                .arg(
                    Arg::new("playbook-out")
                        .long("playbook-out")
                        .value_name("PATH")
                        .required(true)
                        .help("Where to write the evolved playbook"),
                )
                .arg(
                    Arg::new("playbook-in")
                        .long("playbook-in")
                        .value_name("PATH")
                        .help("Start from an existing playbook checkpoint"),
                )
                .arg(
                    Arg::new("epochs")
                        .long("epochs")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u32))
                        .help("Maximum training epochs (offline mode)"),
                )
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .help("Samples processed concurrently per batch (offline mode)"),
                )
                .arg(
                    Arg::new("max-refinement-rounds")
                        .long("max-refinement-rounds")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u32))
                        .help("Additional reflector refinement passes per sample"),
                )
                .arg(
                    Arg::new("dedup-threshold")
                        .long("dedup-threshold")
                        .value_name("F")
                        .value_parser(clap::value_parser!(f32))
                        .help("Cosine similarity at which bullets are deduplicated"),
                )
                .arg(
                    Arg::new("token-budget")
                        .long("token-budget")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .help("Hard token budget for the rendered playbook"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_name("PATH")
                        .help("TOML configuration file"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Render a persisted playbook")
                .arg(
                    Arg::new("playbook")
                        .long("playbook")
                        .value_name("PATH")
                        .required(true)
                        .help("Playbook checkpoint to render"),
                )
                .arg(
                    Arg::new("sections")
                        .long("sections")
                        .value_name("A,B,...")
                        .help("Comma-separated list of sections to include"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("adapt", sub)) => commands::adapt::execute(sub).await,
        Some(("show", sub)) => commands::show::execute(sub),
        _ => unreachable!("subcommand is required"),
    };

    if let Err(error) = result {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}
