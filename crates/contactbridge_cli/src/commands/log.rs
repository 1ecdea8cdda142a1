//! `log` command implementation.

use contactbridge_dav::DavClient;
use contactbridge_sync::{ContactBridge, ContactEngine, SyncLogEntry};

/// Prints the last run of each address book of a server.
pub fn show<D: DavClient, E: ContactEngine>(
    bridge: &ContactBridge<D, E>,
    server_id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = bridge.sync_log(server_id)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }
    Ok(())
}

fn print_text_output(entries: &[SyncLogEntry]) {
    if entries.is_empty() {
        println!("No address book has run yet.");
        return;
    }
    for entry in entries {
        let outcome = if entry.success { "ok" } else { "FAILED" };
        println!(
            "{}  {}  {} ({})",
            entry.time, entry.address_book_name, outcome, entry.run_type
        );
        for line in entry.message.lines().filter(|line| !line.trim().is_empty()) {
            println!("    {line}");
        }
    }
}
