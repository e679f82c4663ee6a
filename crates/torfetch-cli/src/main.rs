use torfetch_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = Cli::run_from_args().await {
        eprintln!("torfetch error: {:#}", err);
        std::process::exit(1);
    }
}
