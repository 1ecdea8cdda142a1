//! CLI command implementations.

pub mod log;
pub mod servers;

use contactbridge_sync::OpResponse;
use std::io::BufRead;

/// Prints an operation's outcome and returns whether it succeeded.
///
/// Successes go to stdout, failures to stderr.
pub fn report(response: &OpResponse) -> bool {
    match (response.success, response.message.is_empty()) {
        (true, true) => println!("ok"),
        (true, false) => println!("{}", response.message),
        (false, _) => eprintln!("failed: {}", response.message),
    }
    response.success
}

/// Reads a password from the first line of stdin.
pub fn read_password() -> Result<String, Box<dyn std::error::Error>> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err("empty password on stdin".into());
    }
    Ok(password)
}
