//! `voicevote-worker <session_id>`: runs one voting session and reports it
//! through the status directory.
//!
//! The session runs on a blocking thread; SIGTERM and Ctrl-C only raise the
//! stop flag, which the capture loops poll between chunks.

use anyhow::Context;
use tracing::{error, info, warn};
use voicevote_app::{settings::effective_settings, worker};
use voicevote_core::{ipc::FileStatusChannel, SessionId, StopSignal};

const USAGE: &str = "Usage: voicevote-worker <session_id>";

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [raw] = args.as_slice() else {
        println!("{USAGE}");
        return Ok(());
    };
    let id = match SessionId::parse(raw) {
        Ok(id) => id,
        Err(e) => {
            println!("{e}");
            println!("{USAGE}");
            return Ok(());
        }
    };

    voicevote_app::init_tracing();
    let settings = effective_settings();
    info!(session = %id, status_dir = %settings.status_dir().display(), "worker starting");

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        let id = id.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!(session = %id, "stop requested");
            stop.raise();
        });
    }

    let session = tokio::task::spawn_blocking({
        let id = id.clone();
        let settings = settings.clone();
        move || worker::run_worker(&id, &settings, stop)
    });

    match session.await {
        Ok(Ok(outcome)) => {
            info!(
                session = %id,
                success = outcome.is_success(),
                message = outcome.message(),
                "worker finished"
            );
            Ok(())
        }
        Ok(Err(e)) => {
            error!(session = %id, "worker failed: {e:#}");
            Err(e)
        }
        Err(join) => {
            error!(session = %id, "session thread died: {join}");
            let channel = FileStatusChannel::new(settings.status_dir())
                .context("opening status directory")?;
            worker::publish_failure(
                &channel,
                &id,
                1,
                &format!("Error during voice voting: {join}"),
            );
            Err(anyhow::anyhow!("session thread died: {join}"))
        }
    }
}
