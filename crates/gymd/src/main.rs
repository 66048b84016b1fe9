use std::process::ExitCode;

fn main() -> ExitCode {
    match gymd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("gymd: {error}");
            ExitCode::FAILURE
        }
    }
}
