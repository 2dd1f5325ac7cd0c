use std::process::ExitCode;

use taskeval_server::start_server;

#[tokio::main]
async fn main() -> ExitCode {
    match start_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("taskeval-server: {err}");
            ExitCode::FAILURE
        }
    }
}
