use clap::Parser;
use vigil_cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        vigil_cli::output::print_error(&format!("Error: {e}"));
        std::process::exit(1);
    }
}
