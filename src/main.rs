use clap::Parser;
use printcore::cli::{run, Args};
use printcore::init_logging;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json)?;
    tracing::info!("printcore {} ({})", printcore::VERSION, printcore::BUILD_DATE);

    run(args)
}
