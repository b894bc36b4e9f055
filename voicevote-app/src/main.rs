//! `voicevote`: terminal frontend for the voice voting worker.
//!
//! ## Runtime note
//!
//! Command handlers are synchronous and quick except `reset`, which may wait
//! out the worker's grace period; that one runs on the blocking pool.
//! Microphone work (`mic-test`) runs entirely on one blocking thread because
//! the capture stream must be dropped where it was opened.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use voicevote_app::{
    commands::{self, ApiResponse, VotingStatus},
    settings::default_settings_path,
    state::AppState,
    worker,
};
use voicevote_core::{
    audio::device::list_input_devices,
    engine::BackendKind,
    ipc::StepStatus,
    StopSignal,
};

#[derive(Debug, Parser)]
#[command(name = "voicevote", version, about = "Cast a vote by voice")]
struct Cli {
    /// Settings file (defaults to $VOICEVOTE_SETTINGS or the data directory).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Print raw API responses as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a voice voting session and follow it until it ends.
    Vote {
        /// Status polling interval in milliseconds.
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,
    },
    /// List the candidates.
    Candidates,
    /// Show the vote tally.
    Results,
    /// List audio input devices.
    Devices,
    /// Listen once through the speech service and print what was heard.
    MicTest {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

fn emit<T: Serialize>(json: bool, response: &ApiResponse<T>, human: impl FnOnce(&T)) {
    if json {
        match serde_json::to_string(response) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("could not encode response: {e}"),
        }
        return;
    }
    match (&response.data, &response.error) {
        (Some(data), _) => human(data),
        (None, Some(error)) => eprintln!("Error: {error}"),
        (None, None) => {}
    }
}

fn print_status(status: &VotingStatus) {
    let marker = match status.status {
        StepStatus::Listening => "🎤",
        StepStatus::Success => "✔",
        StepStatus::Completed => "✅",
        StepStatus::Error => "❌",
    };
    println!("[step {}] {marker} {}", status.step, status.message);
}

async fn vote(state: Arc<AppState>, json: bool, poll: Duration) -> anyhow::Result<()> {
    let started = commands::start_voice_voting(&state);
    emit(json, &started, |s| println!("{} (session {})", s.message, s.session_id));
    let Some(session_id) = started.data.map(|s| s.session_id) else {
        anyhow::bail!("voice voting did not start");
    };

    let mut ticker = tokio::time::interval(poll);
    let mut last: Option<VotingStatus> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling session {session_id}...");
                let state = Arc::clone(&state);
                let id = session_id.clone();
                let reset = tokio::task::spawn_blocking(move || commands::reset_session(&state, &id))
                    .await
                    .context("reset task failed")?;
                emit(json, &reset, |_| println!("Session reset."));
                return Ok(());
            }
            _ = ticker.tick() => {
                let response = commands::voting_status(&state, &session_id);
                let Some(status) = response.data.clone() else {
                    emit(json, &response, |_| {});
                    anyhow::bail!("lost track of session {session_id}");
                };
                if last.as_ref() != Some(&status) {
                    emit(json, &response, print_status);
                }
                if status.is_terminal() {
                    info!(session = %session_id, success = status.result.as_ref().map(|r| r.success), "session ended");
                    return Ok(());
                }
                last = Some(status);
            }
        }
    }
}

fn candidates(state: &AppState, json: bool) {
    emit(json, &commands::candidates(state), |list| {
        for candidate in &list.candidates {
            println!("{}. {}", candidate.id, candidate.name);
        }
    });
}

fn results(state: &AppState, json: bool) {
    let names = commands::candidates(state).data.map(|l| l.candidates).unwrap_or_default();
    emit(json, &commands::results(state), |tally| {
        for candidate in &names {
            let votes = tally
                .results
                .iter()
                .find(|(id, _)| *id == candidate.id)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            println!("{:<12} {votes}", candidate.name);
        }
    });
}

fn devices(json: bool) -> anyhow::Result<()> {
    let devices = list_input_devices();
    if json {
        println!("{}", serde_json::to_string(&devices)?);
    } else if devices.is_empty() {
        println!("No input devices found.");
    } else {
        for device in &devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}: {}{marker}", device.index, device.name);
        }
    }
    Ok(())
}

async fn mic_test(state: &AppState, seconds: u64) -> anyhow::Result<()> {
    let settings = state.settings.clone();
    println!("Listening for {seconds} s...");
    let heard = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<String>> {
        let stop = StopSignal::new();
        let mut engine = worker::build_engine(&settings, &stop)?;
        let request = worker::capture_defaults(&settings, &stop)
            .with_timeout(Duration::from_secs(seconds))
            .with_preference(vec![BackendKind::Online]);
        Ok(engine.capture(&request).map(|t| t.into_string()))
    })
    .await
    .context("microphone test task failed")??;

    match heard {
        Some(text) => println!("Heard: {text}"),
        None => println!("Nothing heard. Check the microphone and speech service key."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voicevote_app::init_tracing();
    let cli = Cli::parse();

    if let Command::Devices = cli.command {
        return devices(cli.json);
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let state = Arc::new(AppState::open(&settings_path)?);
    info!(settings = %state.settings_path.display(), "voicevote ready");

    match cli.command {
        Command::Vote { poll_ms } => {
            vote(Arc::clone(&state), cli.json, Duration::from_millis(poll_ms.max(50))).await
        }
        Command::Candidates => {
            candidates(&state, cli.json);
            Ok(())
        }
        Command::Results => {
            results(&state, cli.json);
            Ok(())
        }
        Command::MicTest { seconds } => mic_test(&state, seconds.clamp(1, 60)).await,
        Command::Devices => devices(cli.json),
    }
}
