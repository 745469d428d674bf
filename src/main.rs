use campaigncmd::cli::{
    run_billing, run_campaign, run_config, run_contact, run_events, run_site, run_tag, run_tick,
    Cli, Commands,
};
use campaigncmd::db::Database;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = Database::open()?;

    match cli.command {
        Commands::Site(args) => run_site(&db, args)?,
        Commands::Contact(args) => run_contact(&db, args)?,
        Commands::Tag(args) => run_tag(&db, args)?,
        Commands::Campaign(args) => run_campaign(&db, args)?,
        Commands::Billing(args) => run_billing(&db, args)?,
        Commands::Tick => run_tick(&db)?,
        Commands::Events(args) => run_events(&db, args)?,
        Commands::Config(args) => run_config(&db, args)?,
    }

    Ok(())
}
