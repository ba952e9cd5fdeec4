use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use interview_voice::{
    Config, LiveTransport, Microphone, OutputDevice, SessionController, SessionState,
    WavMicrophone, WavOutput,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Talk to a live interview agent
#[derive(Debug, Parser)]
#[command(name = "interview-voice", version)]
struct Args {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/interview-voice")]
    config: String,

    /// 16kHz mono WAV file used as the microphone
    #[arg(long, required_unless_present = "live")]
    input: Option<PathBuf>,

    /// WAV file the agent's speech is written to
    #[arg(long, default_value = "agent-reply.wav")]
    output: PathBuf,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Use the default system microphone and speaker
    #[arg(long)]
    live: bool,

    /// Restart the input file when it ends instead of sending silence
    #[arg(long)]
    loop_input: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(Some(&args.config))?;

    info!("Interview Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Agent model: {}", cfg.agent.model);

    let (microphone, output) = devices(&args)?;
    let controller = Arc::new(SessionController::new(
        cfg.session_config(),
        microphone,
        output,
        Arc::new(LiveTransport::new()),
    ));

    let mut transitions = controller.subscribe();
    let status_task = tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(state) => info!("Status: {}", state),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} status update(s)", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let start = tokio::select! {
        result = controller.start() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted while connecting");
            controller.stop().await;
            status_task.abort();
            return Ok(());
        }
    };

    if let Err(e) = start {
        error!("Could not start session: {}", e);
        status_task.abort();
        return Err(e).context("Session failed to start");
    }

    info!("Session live, press Ctrl-C to stop");

    let mut status = controller.watch_status();
    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Stopping on Ctrl-C"),
        _ = deadline => info!("Duration reached"),
        _ = status.wait_for(|s| !s.is_running()) => {}
    }

    controller.stop().await;

    let stats = controller.stats();
    info!(
        "Session finished: {:.1}s, {} chunk(s) sent, {} dropped, {} frame(s) played, {} interruption(s)",
        stats.duration_secs,
        stats.chunks_sent,
        stats.chunks_dropped,
        stats.frames_scheduled,
        stats.interruptions
    );

    status_task.abort();

    match controller.status() {
        SessionState::Failed(reason) => bail!("Session failed: {}", reason),
        _ => Ok(()),
    }
}

fn devices(args: &Args) -> Result<(Arc<dyn Microphone>, Arc<dyn OutputDevice>)> {
    if args.live {
        return live_devices();
    }

    let input = args
        .input
        .clone()
        .context("--input is required without --live")?;

    info!("Microphone: {}", input.display());
    info!("Agent audio -> {}", args.output.display());

    Ok((
        Arc::new(WavMicrophone::new(input).looped(args.loop_input)),
        Arc::new(WavOutput::new(args.output.clone())),
    ))
}

#[cfg(feature = "cpal")]
fn live_devices() -> Result<(Arc<dyn Microphone>, Arc<dyn OutputDevice>)> {
    use interview_voice::audio::{CpalMicrophone, CpalOutput};

    info!("Using system microphone and speaker");
    Ok((Arc::new(CpalMicrophone::new()), Arc::new(CpalOutput::new())))
}

#[cfg(not(feature = "cpal"))]
fn live_devices() -> Result<(Arc<dyn Microphone>, Arc<dyn OutputDevice>)> {
    bail!("--live needs the `cpal` feature (cargo build --features cpal)")
}
