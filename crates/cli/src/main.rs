use std::process::ExitCode;

fn main() -> ExitCode {
    guru_cli::run()
}
