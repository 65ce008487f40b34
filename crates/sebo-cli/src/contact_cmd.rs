//! Contact subcommands: add, list, rename, delete, select, verify, check.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;

use sebo_crypto::{CryptoContext, KeyCheck, format_fingerprint_display};

use crate::arg_or_stdin;

/// Contact subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum ContactAction {
    /// Pair with a peer from their exchanged public key.
    Add {
        /// Display name (defaults to "Contact N").
        name: Option<String>,
        /// Peer key text; read from stdin when omitted.
        #[arg(long)]
        key: Option<String>,
    },
    /// List stored contacts. The active one is marked with `*`.
    List,
    /// Rename a contact.
    Rename {
        /// Contact id, id prefix, or name.
        contact: String,
        new_name: String,
    },
    /// Delete a contact.
    Delete {
        /// Contact id, id prefix, or name.
        contact: String,
    },
    /// Make a contact the default for encrypt/decrypt.
    Select {
        /// Contact id, id prefix, or name.
        contact: String,
    },
    /// Compare a contact's fingerprint with one read out-of-band.
    Verify {
        /// Contact id, id prefix, or name.
        contact: String,
        /// Fingerprint as read by the peer; case and separators are ignored.
        #[arg(required = true, num_args = 1..)]
        fingerprint: Vec<String>,
    },
    /// Check whether a key already belongs to a stored contact.
    Check {
        /// Peer key text; read from stdin when omitted.
        #[arg(long)]
        key: Option<String>,
    },
}

/// Execute a contact subcommand.
pub fn run(
    action: ContactAction,
    ctx: &mut CryptoContext,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        ContactAction::Add { name, key } => add(ctx, name.as_deref(), &arg_or_stdin(key)?, out),
        ContactAction::List => list(ctx, out),
        ContactAction::Rename { contact, new_name } => {
            let id = find_contact(ctx, &contact)?;
            ctx.rename(&id, &new_name)?;
            writeln!(out, "Renamed contact {id}")?;
            Ok(())
        }
        ContactAction::Delete { contact } => {
            let id = find_contact(ctx, &contact)?;
            ctx.delete(&id)?;
            writeln!(out, "Deleted contact {id}")?;
            match ctx.active_contact() {
                Some(active) => writeln!(out, "Active contact: {}", active.name)?,
                None => writeln!(out, "No active contact. Add one with: sebo contact add")?,
            }
            Ok(())
        }
        ContactAction::Select { contact } => {
            let id = find_contact(ctx, &contact)?;
            let selected = ctx.select(&id)?;
            writeln!(out, "Active contact: {}", selected.name)?;
            Ok(())
        }
        ContactAction::Verify {
            contact,
            fingerprint,
        } => {
            let id = find_contact(ctx, &contact)?;
            if ctx.verify_fingerprint(&id, &fingerprint.join(" "))? {
                writeln!(out, "Fingerprint matches")?;
                Ok(())
            } else {
                anyhow::bail!("Fingerprint does NOT match. The key may have been substituted.")
            }
        }
        ContactAction::Check { key } => {
            match ctx.check_key(&arg_or_stdin(key)?)? {
                KeyCheck::New { fingerprint } => {
                    writeln!(out, "New key")?;
                    writeln!(out, "{}", format_fingerprint_display(&fingerprint))?;
                }
                KeyCheck::Known { id, name } => writeln!(out, "Known key: {name} ({id})")?,
            }
            Ok(())
        }
    }
}

fn add(
    ctx: &mut CryptoContext,
    name: Option<&str>,
    key_text: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    ctx.on_key_scanned(key_text);
    let contact = ctx.confirm_pending(name.unwrap_or_default())?;
    writeln!(out, "Added contact {} ({})", contact.name, contact.id)?;
    writeln!(out, "Fingerprint:")?;
    writeln!(out, "{}", format_fingerprint_display(&contact.fingerprint))?;
    writeln!(
        out,
        "Compare it with the peer's `sebo key fingerprint`, then run: sebo contact verify"
    )?;
    Ok(())
}

fn list(ctx: &CryptoContext, out: &mut impl Write) -> anyhow::Result<()> {
    if ctx.contacts().is_empty() {
        writeln!(out, "No contacts")?;
        return Ok(());
    }
    let active = ctx.active_contact().map_or("", |c| c.id.as_str());
    writeln!(out, "{:<3} {:<36} {:<20} FINGERPRINT", "", "ID", "NAME")?;
    for c in ctx.contacts() {
        let marker = if c.id == active { " *" } else { "  " };
        let short: String = c.fingerprint.chars().take(23).collect();
        writeln!(out, "{:<3} {:<36} {:<20} {short}", marker, c.id, c.name)?;
    }
    Ok(())
}

/// Resolve a user-supplied contact reference to an id.
///
/// Tries an exact id, then a unique id prefix, then a unique
/// case-insensitive name.
pub fn find_contact(ctx: &CryptoContext, query: &str) -> anyhow::Result<String> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("Contact reference is empty");
    }
    if let Some(c) = ctx.contact(query) {
        return Ok(c.id.clone());
    }
    let by_prefix: Vec<_> = ctx
        .contacts()
        .iter()
        .filter(|c| c.id.starts_with(query))
        .collect();
    if let [only] = by_prefix.as_slice() {
        return Ok(only.id.clone());
    }
    let by_name: Vec<_> = ctx
        .contacts()
        .iter()
        .filter(|c| c.name.eq_ignore_ascii_case(query))
        .collect();
    match by_name.as_slice() {
        [only] => Ok(only.id.clone()),
        [] if by_prefix.is_empty() => anyhow::bail!("No contact matches '{query}'"),
        _ => anyhow::bail!("'{query}' is ambiguous; use the full contact id"),
    }
}
