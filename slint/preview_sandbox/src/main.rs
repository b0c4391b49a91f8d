//! Sandbox renderer process. Reads the document and host envelopes as frames
//! on stdin and writes sandbox envelopes as frames on stdout; logs go to
//! stderr.

use std::io;
use tracing::{error, info};

fn main() {
    if let Err(err) = preview_ui_host_runtime::init_logging() {
        eprintln!("failed to initialise logging: {err}");
    }

    match preview_ui_host_runtime::renderer::serve(io::stdin(), io::stdout()) {
        Ok(_) => info!("sandbox exiting"),
        Err(err) => {
            error!("sandbox fatal error: {err}");
            std::process::exit(1);
        }
    }
}
