//! Stable terminal identity.
//!
//! Every sale is tagged with the identity of the terminal that created it;
//! the remote ledger uses it to attribute and deduplicate submissions. The
//! identity is a UUID minted on first use and persisted in the OS credential
//! store (DPAPI on Windows, Keychain on macOS, Secret Service / keyutils on
//! Linux). When the credential store is unusable the module degrades to a
//! process-lifetime value: stable until restart, regenerated after.
//! Identity lookup itself never fails.

use std::sync::OnceLock;

use keyring::Entry;
use tracing::{info, warn};
use uuid::Uuid;

const SERVICE_NAME: &str = "fairpos-core";
const KEY_TERMINAL_ID: &str = "terminal-id";

/// Fallback identity used when the OS keyring cannot be reached. The minted
/// identity is parked here even when persistence succeeds, so repeated calls
/// agree no matter which path they take.
static PROCESS_TERMINAL_ID: OnceLock<String> = OnceLock::new();

/// Return this terminal's stable identifier.
pub fn terminal_id() -> String {
    match read_keyring() {
        Ok(Some(id)) => id,
        Ok(None) => {
            let id = process_value();
            match write_keyring(&id) {
                Ok(()) => info!(terminal_id = %id, "terminal identity created"),
                Err(e) => warn!(
                    error = %e,
                    "keyring write failed; terminal identity is process-local until restart"
                ),
            }
            id
        }
        Err(e) => {
            warn!(
                error = %e,
                "keyring unavailable; terminal identity is process-local until restart"
            );
            process_value()
        }
    }
}

/// Remove the persisted identity (decommissioning a terminal).
///
/// Clears the keyring entry only. A value already minted by this process
/// remains in use until restart, so a reset terminal should be restarted
/// before its next sale.
pub fn reset_identity() -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, KEY_TERMINAL_ID).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => {
            info!("terminal identity cleared");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

fn process_value() -> String {
    PROCESS_TERMINAL_ID
        .get_or_init(|| Uuid::new_v4().to_string())
        .clone()
}

fn read_keyring() -> Result<Option<String>, keyring::Error> {
    let entry = Entry::new(SERVICE_NAME, KEY_TERMINAL_ID)?;
    match entry.get_password() {
        Ok(id) if !id.trim().is_empty() => Ok(Some(id)),
        Ok(_) => Ok(None),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_keyring(id: &str) -> Result<(), keyring::Error> {
    Entry::new(SERVICE_NAME, KEY_TERMINAL_ID)?.set_password(id)
}
