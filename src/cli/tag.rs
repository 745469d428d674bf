use anyhow::Result;
use clap::{Args, Subcommand};

use crate::db::Database;
use crate::models::Tag;

#[derive(Args)]
pub struct TagArgs {
    #[command(subcommand)]
    pub command: TagCommands,
}

#[derive(Subcommand)]
pub enum TagCommands {
    /// Create a tag
    Add {
        /// Site name
        #[arg(short, long)]
        site: String,
        /// Tag name (unique per site)
        name: String,
        /// Display color, e.g. "#1d4ed8"
        #[arg(short, long)]
        color: Option<String>,
    },
    /// List a site's tags
    List {
        #[arg(short, long)]
        site: String,
    },
    /// Delete a tag. System tags are refused.
    Delete {
        #[arg(short, long)]
        site: String,
        name: String,
    },
}

pub fn run_tag(db: &Database, args: TagArgs) -> Result<()> {
    match args.command {
        TagCommands::Add { site, name, color } => {
            let site = super::resolve_site(db, &site)?;
            let mut tag = Tag::new(site.id, name);
            tag.color = color;
            db.insert_tag(&tag)?;
            println!("Added tag '{}' to {}", tag.name, site.name);
        }
        TagCommands::List { site } => {
            let site = super::resolve_site(db, &site)?;
            let tags = db.list_tags(site.id)?;
            if tags.is_empty() {
                println!("No tags on {}", site.name);
                return Ok(());
            }
            for tag in tags {
                let marker = if tag.is_system { " (system)" } else { "" };
                let color = tag.color.as_deref().unwrap_or("-");
                println!("{:<24}  {:<10}{}", tag.name, color, marker);
            }
        }
        TagCommands::Delete { site, name } => {
            let site = super::resolve_site(db, &site)?;
            if db.delete_tag(site.id, &name)? {
                println!("Deleted tag '{}'", name);
            } else {
                println!("No tag named '{}' on {}", name, site.name);
            }
        }
    }
    Ok(())
}
