mod cli;

use std::process::ExitCode;

use lookout_core::cache::CacheCorruption;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}"); // pretty anyhow chain
            if err.downcast_ref::<CacheCorruption>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::from(3)
            }
        }
    }
}
