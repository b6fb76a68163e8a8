use std::process::ExitCode;

fn main() -> ExitCode {
    costwise_cli::run()
}
