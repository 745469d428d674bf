use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::db::Database;
use crate::models::{Contact, ContactStatus};

use super::import;

#[derive(Args)]
pub struct ContactArgs {
    #[command(subcommand)]
    pub command: ContactCommands,
}

#[derive(Subcommand)]
pub enum ContactCommands {
    /// Add a contact (pending until activated)
    Add {
        #[arg(short, long)]
        site: String,
        email: String,
        #[arg(short, long)]
        first: Option<String>,
        #[arg(short, long)]
        last: Option<String>,
    },
    /// List contacts, optionally by status
    List {
        #[arg(short, long)]
        site: String,
        /// pending, active, or unsubscribed
        #[arg(long)]
        status: Option<String>,
    },
    /// Confirm a pending contact
    Activate {
        #[arg(short, long)]
        site: String,
        email: String,
    },
    /// Opt a contact out (terminal until re-subscription)
    Unsubscribe {
        #[arg(short, long)]
        site: String,
        email: String,
    },
    /// Reactivate an unsubscribed contact back to pending
    Resubscribe {
        #[arg(short, long)]
        site: String,
        email: String,
    },
    /// Assign a tag to a contact
    Tag {
        #[arg(short, long)]
        site: String,
        email: String,
        tag: String,
    },
    /// Remove a tag from a contact
    Untag {
        #[arg(short, long)]
        site: String,
        email: String,
        tag: String,
    },
    /// Import contacts from a CSV file (headers: email, first_name, last_name)
    Import {
        #[arg(short, long)]
        site: String,
        /// Path to the CSV file
        file: String,
        /// Tag every imported contact
        #[arg(short, long)]
        tag: Option<String>,
    },
}

pub fn run_contact(db: &Database, args: ContactArgs) -> Result<()> {
    match args.command {
        ContactCommands::Add {
            site,
            email,
            first,
            last,
        } => {
            let site = super::resolve_site(db, &site)?;
            let mut contact = Contact::new(site.id, email);
            contact.first_name = first;
            contact.last_name = last;
            db.insert_contact(&contact)?;
            println!("Added {} (pending)", contact.email);
        }
        ContactCommands::List { site, status } => {
            let site = super::resolve_site(db, &site)?;
            let contacts = match status {
                Some(s) => {
                    let status: ContactStatus = s.parse().map_err(|e: String| anyhow!(e))?;
                    let statuses = std::collections::HashSet::from([status]);
                    db.list_contacts_by_status(site.id, &statuses)?
                }
                None => db.list_contacts(site.id)?,
            };
            if contacts.is_empty() {
                println!("No contacts");
                return Ok(());
            }
            println!("{:<32}  {:<24}  {}", "EMAIL", "NAME", "STATUS");
            for contact in contacts {
                println!(
                    "{:<32}  {:<24}  {}",
                    contact.email,
                    contact.display_name(),
                    contact.status
                );
            }
        }
        ContactCommands::Activate { site, email } => {
            let site = super::resolve_site(db, &site)?;
            if db.activate_contact(site.id, &email)? {
                println!("Activated {}", email);
            } else {
                println!("{} is not a pending contact", email);
            }
        }
        ContactCommands::Unsubscribe { site, email } => {
            let site = super::resolve_site(db, &site)?;
            if db.unsubscribe_contact(site.id, &email)? {
                println!("Unsubscribed {}", email);
            } else {
                println!("{} was not subscribed", email);
            }
        }
        ContactCommands::Resubscribe { site, email } => {
            let site = super::resolve_site(db, &site)?;
            if db.reactivate_contact(site.id, &email)? {
                println!("Re-subscribed {} (pending)", email);
            } else {
                println!("{} is not unsubscribed", email);
            }
        }
        ContactCommands::Tag { site, email, tag } => {
            let site = super::resolve_site(db, &site)?;
            let contact = db
                .get_contact_by_email(site.id, &email)?
                .ok_or_else(|| anyhow!("no contact {}", email))?;
            let tag = db
                .get_tag_by_name(site.id, &tag)?
                .ok_or_else(|| anyhow!("no tag '{}'; create it with: campaigncmd tag add", tag))?;
            if db.assign_tag(contact.id, tag.id)? {
                println!("Tagged {} with '{}'", email, tag.name);
            } else {
                println!("{} already has '{}'", email, tag.name);
            }
        }
        ContactCommands::Untag { site, email, tag } => {
            let site = super::resolve_site(db, &site)?;
            let contact = db
                .get_contact_by_email(site.id, &email)?
                .ok_or_else(|| anyhow!("no contact {}", email))?;
            let tag = db
                .get_tag_by_name(site.id, &tag)?
                .ok_or_else(|| anyhow!("no tag '{}'", tag))?;
            db.remove_tag(contact.id, tag.id)?;
            println!("Removed '{}' from {}", tag.name, email);
        }
        ContactCommands::Import { site, file, tag } => {
            let site = super::resolve_site(db, &site)?;
            let summary = import::import_csv(db, site.id, &file, tag.as_deref())?;
            println!(
                "Imported {} contact(s), skipped {} existing, {} invalid row(s)",
                summary.imported, summary.skipped, summary.invalid
            );
        }
    }
    Ok(())
}
