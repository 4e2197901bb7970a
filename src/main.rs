use alphasim::cli::{Cli, run};
use clap::Parser;

fn main() -> std::process::ExitCode {
    alphasim::init_tracing();
    run(Cli::parse())
}
