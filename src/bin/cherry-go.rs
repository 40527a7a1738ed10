use clap::Parser;

use cherry_rs::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    cli::init_tracing(cli.quiet, cli.verbose);
    std::process::exit(cli::run(cli));
}
