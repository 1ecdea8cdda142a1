//! `servers` and `server` command implementations.

use contactbridge_dav::DavClient;
use contactbridge_sync::{AddressBookSummary, ContactBridge, ContactEngine, ServerSummary};

/// Prints every saved server.
pub fn list<D: DavClient, E: ContactEngine>(
    bridge: &ContactBridge<D, E>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let servers = bridge.list_servers()?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&servers)?);
        }
        _ => {
            print_servers(&servers);
        }
    }
    Ok(())
}

/// Prints the address books of one server.
pub fn detail<D: DavClient, E: ContactEngine>(
    bridge: &ContactBridge<D, E>,
    server_id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let books = bridge.server_detail(server_id)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&books)?);
        }
        _ => {
            print_address_books(&books);
        }
    }
    Ok(())
}

fn print_servers(servers: &[ServerSummary]) {
    if servers.is_empty() {
        println!("No servers saved.");
        return;
    }
    println!("{:<10} {:<32} {:>13}", "ID", "NAME", "ADDRESS BOOKS");
    for server in servers {
        println!(
            "{:<10} {:<32} {:>13}",
            server.id, server.name, server.address_book_count
        );
    }
}

fn print_address_books(books: &[AddressBookSummary]) {
    if books.is_empty() {
        println!("No address books.");
        return;
    }
    println!("{:<42} {:<8} NAME", "ID", "ENABLED");
    for book in books {
        let enabled = if book.enabled { "yes" } else { "no" };
        println!("{:<42} {:<8} {}", book.id, enabled, book.name);
    }
}
