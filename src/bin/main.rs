use std::path::PathBuf;

use clap::Parser;
use log::error;

use mod_sketch::commands::Commands;
use mod_sketch::logging::init_logging;

#[derive(Parser)]
#[command(
    name = "modsketch",
    author,
    version,
    about = "modimizer sketching and long-read overlap analysis",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_filepath: Option<PathBuf>,
    /// Only log errors.
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    let handle = init_logging(cli.log_filepath.as_ref(), cli.quiet);
    if let Err(e) = cli.command.run() {
        if handle.is_some() {
            error!("modsketch failed, {e}");
        } else {
            eprintln!("modsketch failed, {e}");
        }
        std::process::exit(1);
    }
}
