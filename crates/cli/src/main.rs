use std::process::ExitCode;

fn main() -> ExitCode {
    maestro_cli::run()
}
