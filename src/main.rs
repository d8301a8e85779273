//! flowtest CLI binary
//!
//! All logic is in the library; main only maps the outcome to the process exit.

fn main() -> std::process::ExitCode {
    flowtest::cli::run()
}
