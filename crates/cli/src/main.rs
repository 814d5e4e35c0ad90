use std::process::ExitCode;

fn main() -> ExitCode {
    propdraft_cli::run()
}
