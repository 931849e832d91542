mod cli;
mod core;
mod domain;
mod infra;

use cli::commands::run;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("snip: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
