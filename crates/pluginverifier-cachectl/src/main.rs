//! Inspects and cleans up plugin verifier file repositories.

mod cli;
mod commands;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            pluginverifier_repository::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
