#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use clap::{Parser, Subcommand};

use textindex::query::{grep, search};
use textindex::{build_index, handle_messages, Config, ErrorHandler};

#[derive(Parser, Debug)]
#[command(
    name = "textindex",
    about = "A disk-backed full-text search index for local directories",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// The key functionality commands
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'l',
        long = "log",
        help = "Append progress and warning messages to a file instead of stderr"
    )]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a fresh index over a directory tree
    Index {
        /// Target index directory; must not exist yet
        index_dir: PathBuf,
        /// Directory tree to index
        corpus_dir: PathBuf,
    },
    /// Print the files containing every query term
    Query {
        index_dir: PathBuf,
        #[arg(required = true)]
        terms: Vec<String>,
    },
    /// Print matching lines of the files containing every query term
    Grep {
        index_dir: PathBuf,
        #[arg(required = true)]
        terms: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let error_handler = match args.log_file {
        Some(file) => ErrorHandler::File(file),
        None => ErrorHandler::Stderr,
    };

    let (sender, receiver) = mpsc::channel();
    let logger = thread::spawn(move || handle_messages(&receiver, &error_handler));

    let outcome = match args.command {
        Commands::Index {
            index_dir,
            corpus_dir,
        } => build_index(&Config::new(index_dir, corpus_dir, sender.clone())),
        Commands::Query { index_dir, terms } => search(&index_dir, &terms).map(|paths| {
            for path in paths {
                println!("{path}");
            }
        }),
        Commands::Grep { index_dir, terms } => {
            let stdout = io::stdout();
            grep(&index_dir, &terms, &mut stdout.lock(), &sender)
        }
    };

    // Close our end of the channel, then let the logger finish writing
    // whatever is still queued before the process exits.
    drop(sender);
    let _ = logger.join();

    outcome
}
