use std::process::ExitCode;

fn main() -> ExitCode {
    fileway_cli::run()
}
