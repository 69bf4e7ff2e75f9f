use std::process::ExitCode;

fn main() -> ExitCode {
    gemsource_cli::run()
}
