use std::process::ExitCode;

fn main() -> ExitCode {
    match vgcache::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            if let Some(hint) = vgcache::cli::hint_for(&e) {
                eprintln!("hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}
