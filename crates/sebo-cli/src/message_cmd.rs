//! Message commands: encrypt and decrypt text for a contact.

use std::io::Write;

use sebo_crypto::{CryptoContext, CryptoError};

use crate::arg_or_stdin;
use crate::contact_cmd::find_contact;

/// Arguments shared by `encrypt` and `decrypt`.
#[derive(clap::Args, Debug)]
pub struct MessageArgs {
    /// Text to process; read from stdin when omitted.
    pub text: Option<String>,
    /// Contact to use instead of the active one (id, id prefix, or name).
    #[arg(short, long)]
    pub contact: Option<String>,
}

pub fn encrypt(args: MessageArgs, ctx: &CryptoContext, out: &mut impl Write) -> anyhow::Result<()> {
    let plaintext = arg_or_stdin(args.text)?;
    let ciphertext = match args.contact {
        Some(query) => ctx.encrypt_for(&find_contact(ctx, &query)?, &plaintext),
        None => ctx.encrypt(&plaintext),
    }
    .map_err(user_facing)?;
    writeln!(out, "{ciphertext}")?;
    Ok(())
}

pub fn decrypt(args: MessageArgs, ctx: &CryptoContext, out: &mut impl Write) -> anyhow::Result<()> {
    let ciphertext = arg_or_stdin(args.text)?;
    let plaintext = match args.contact {
        Some(query) => ctx.decrypt_from(&find_contact(ctx, &query)?, &ciphertext),
        None => ctx.decrypt(&ciphertext),
    }
    .map_err(user_facing)?;
    writeln!(out, "{plaintext}")?;
    Ok(())
}

fn user_facing(err: CryptoError) -> anyhow::Error {
    match err {
        CryptoError::NoActiveContact => {
            anyhow::anyhow!("No contact selected. Run: sebo contact add / sebo contact select")
        }
        CryptoError::Authentication => {
            anyhow::anyhow!("Decryption failed - wrong contact or corrupted message?")
        }
        other => other.into(),
    }
}
