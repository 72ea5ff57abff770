//! Pairing command: inspect or forget the stored transmitter.

use anyhow::Result;
use cgmlink_store::Store;

use crate::cli::PairingAction;
use crate::format::format_pairing_text;

pub fn cmd_pairing(action: PairingAction, store: &Store) -> Result<()> {
    match action {
        PairingAction::Show => {
            print!("{}", format_pairing_text(store.load_pairing()?.as_ref()));
        }
        PairingAction::Clear => {
            if store.clear_pairing()? {
                println!("Pairing cleared. The next session will scan for a transmitter.");
            } else {
                println!("No transmitter paired.");
            }
        }
    }
    Ok(())
}
