//! Sebo CLI Library
//!
//! Terminal front-end for the Sebo crypto core: show and exchange keys,
//! manage contacts, and encrypt/decrypt text to paste into any messenger.

pub mod config;
pub mod contact_cmd;
pub mod key_cmd;
pub mod message_cmd;
pub mod tracing_init;

/// Use `arg` if given, otherwise read all of stdin minus one trailing
/// line break.
pub fn arg_or_stdin(arg: Option<String>) -> anyhow::Result<String> {
    if let Some(text) = arg {
        return Ok(text);
    }
    let mut text = std::io::read_to_string(std::io::stdin())?;
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    Ok(text)
}

#[cfg(test)]
pub(crate) mod test_support {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use sebo_crypto::{CONTACTS_FILE, CryptoContext, KeyVault};

    /// A context over an in-memory vault and a throwaway contact file.
    pub fn context() -> (tempfile::TempDir, CryptoContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CryptoContext::with_vault(
            Arc::new(KeyVault::in_memory()),
            dir.path().join(CONTACTS_FILE),
        )
        .unwrap();
        (dir, ctx)
    }
}
