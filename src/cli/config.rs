use anyhow::Result;
use clap::{Args, Subcommand};

use crate::db::Database;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Configure the SMTP relay used for dispatch
    Smtp {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 25)]
        port: u16,
    },
    /// Show current settings
    Show,
}

pub fn run_config(db: &Database, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Smtp { host, port } => {
            db.setting_set("smtp_host", &host)?;
            db.setting_set("smtp_port", &port.to_string())?;
            println!("SMTP relay set to {}:{}", host, port);
        }
        ConfigCommands::Show => {
            let host = db.setting_get("smtp_host")?.unwrap_or_else(|| "localhost".to_string());
            let port = db.setting_get("smtp_port")?.unwrap_or_else(|| "25".to_string());
            println!("SMTP relay:     {}:{}", host, port);
            let secret = db.setting_get("webhook_secret")?;
            println!(
                "Events secret:  {}",
                if secret.is_some() { "configured" } else { "not set" }
            );
        }
    }
    Ok(())
}
