//! Key subcommands: show, qr, fingerprint.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;

use sebo_crypto::{CryptoContext, exchange, format_fingerprint_display};

/// Own-key subcommand actions.
#[derive(clap::Subcommand, Debug)]
pub enum KeyAction {
    /// Print this device's public key as exchange text.
    Show,
    /// Print this device's public key as a QR code.
    Qr,
    /// Print this device's key fingerprint for out-of-band comparison.
    Fingerprint,
}

/// Execute a key subcommand.
pub fn run(action: &KeyAction, ctx: &CryptoContext, out: &mut impl Write) -> anyhow::Result<()> {
    match action {
        KeyAction::Show => writeln!(out, "{}", ctx.my_public_key_text()?)?,
        KeyAction::Qr => {
            let text = ctx.my_public_key_text()?;
            write!(out, "{}", exchange::render_qr_terminal(&text)?)?;
        }
        KeyAction::Fingerprint => {
            writeln!(out, "{}", format_fingerprint_display(&ctx.my_fingerprint()?))?;
        }
    }
    Ok(())
}
