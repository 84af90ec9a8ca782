// Pendant Linux host: replays captured BLE notifications through the audio engine.

mod config;
mod replay;
mod session;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use pendant_core::{Event, PendantCore, TransportMode};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::session::Session;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: pendant-linux replay <capture-file> [--mode stream|packets]";

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut capture: Option<PathBuf> = None;
    let mut mode: Option<TransportMode> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("pendant-linux {}", VERSION);
                return Ok(());
            }
            "replay" => {
                let path = args.next().context(USAGE)?;
                capture = Some(PathBuf::from(path));
            }
            "--mode" => {
                mode = match args.next().as_deref() {
                    Some("stream") => Some(TransportMode::Stream),
                    Some("packets") => Some(TransportMode::Packets),
                    _ => bail!(USAGE),
                };
            }
            _ => bail!(USAGE),
        }
    }
    let Some(capture) = capture else {
        bail!(USAGE);
    };

    init_tracing();
    let mut cfg = config::load();
    if let Some(m) = mode {
        cfg.mode = m;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            r = run_replay(cfg, capture) => r,
            r = shutdown_signal() => {
                info!("interrupted");
                r
            }
        }
    })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pendant_linux=info,pendant_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_replay(cfg: config::Config, capture: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&capture)
        .await
        .with_context(|| format!("reading {}", capture.display()))?;
    let notifications = replay::read_records(&bytes)?;
    info!(
        file = %capture.display(),
        notifications = notifications.len(),
        mode = ?cfg.mode,
        "replaying capture"
    );

    let core = PendantCore::new(cfg.mode, cfg.reassembler.clone())
        .context("invalid reassembler config")?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut session = Session::connect(core, cfg.reassembler.sweep_interval, tx);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut frames = 0u64;
        while let Some(event) = rx.recv().await {
            match event {
                Event::Frame { data, .. } => {
                    let mut rec = Vec::with_capacity(data.len() + 2);
                    replay::write_record(&mut rec, &data)?;
                    stdout.write_all(&rec).await?;
                    frames += 1;
                }
                Event::Loss(l) => {
                    warn!(frame_id = l.frame_id, lost = ?l.lost_indices, "frame lost");
                }
            }
        }
        stdout.flush().await?;
        anyhow::Ok(frames)
    });

    for n in notifications {
        session.on_notification(n).await;
    }
    // Let the last partial frames age out through the sweep.
    tokio::time::sleep(cfg.reassembler.frame_timeout + cfg.reassembler.sweep_interval * 2).await;

    let m = session.metrics().await;
    session.disconnect().await;
    drop(session);
    let frames = writer.await.context("frame writer panicked")??;
    info!(
        frames,
        complete = m.frames_complete,
        incomplete = m.frames_incomplete,
        recovered = m.frames_recovered,
        packets_lost = m.packets_lost,
        completion_rate = m.completion_rate(),
        loss_rate = m.loss_rate(),
        healthy = m.is_healthy(),
        "replay finished"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
