//! Binary entrypoint for the terminal chat client.

use std::process::ExitCode;

use parley::start_parley;

/// Load configuration, open the store and read commands from stdin.
fn main() -> ExitCode {
    start_parley::run_terminal()
}
