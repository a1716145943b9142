// src/main.rs

use stackup::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(err) = run_main(args).await {
        eprintln!("stackup: {err:#}");
        std::process::exit(1);
    }
}

async fn run_main(args: cli::CliArgs) -> anyhow::Result<()> {
    logging::init_logging(args.log_level)?;
    run(args).await
}
