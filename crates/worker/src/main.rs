use clap::Parser;

use chatlog_worker::Cli;

fn main() -> anyhow::Result<()> {
    chatlog_observability::init();

    let cli = Cli::parse();
    chatlog_worker::run(cli)?;
    Ok(())
}
