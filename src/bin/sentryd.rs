//! sentryd - brand sentry daemon
//!
//! This daemon:
//! 1. Loads configuration from file and environment
//! 2. Loads the detection model on a background thread
//! 3. Enables the camera once the model is ready
//! 4. Runs the frame loop until the stream ends, the source is lost, or Ctrl-C
//! 5. Reads mask painting commands from stdin while running

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use brand_sentry::{
    console,
    frame_loop::RefreshScheduler,
    overlay::LogSurface,
    ui::{Ui, UiMode},
    AlarmSink, AudioFileAlarm, ExclusionMask, FrameLoop, HttpVerifier, LogAlarm, LoopExit,
    LoopState, MaskHandle, OverlayRenderer, PendingModel, SentryConfig, Session, StrokeTracker,
    VerificationGate,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch a camera for one vehicle brand and sound an alarm")]
struct Args {
    /// Config file (JSON, or TOML when the extension is .toml).
    #[arg(long, env = "SENTRY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not read painting commands from stdin.
    #[arg(long)]
    no_console: bool,

    /// Seconds to wait for the detection model.
    #[arg(long, default_value_t = 120)]
    model_timeout: u64,

    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);

    let cfg = staged(&ui, "Load configuration", || {
        SentryConfig::load_from(args.config.as_deref())
    })?;
    if cfg.verification.api_key.is_none() {
        log::warn!("no verification api key configured; requests are sent without one");
    }

    let verifier = Arc::new(HttpVerifier::new(cfg.verifier_config())?);
    log::info!("verification endpoint {}", verifier.endpoint());
    let alarm: Arc<dyn AlarmSink> =
        match AudioFileAlarm::new(&cfg.alarm.asset, cfg.alarm.player.clone()) {
            Ok(alarm) => Arc::new(alarm),
            Err(e) => {
                log::warn!("{}; alarms will only be logged", e);
                Arc::new(LogAlarm)
            }
        };

    let mask = MaskHandle::new(ExclusionMask::new(cfg.mask.stroke_width));
    let session = Session::new(
        mask.clone(),
        cfg.detection_filter(),
        OverlayRenderer::new(Box::new(LogSurface::default())),
        VerificationGate::new(cfg.gate_settings(), verifier, alarm),
    )
    .with_preset_strokes(cfg.mask.strokes.clone())
    .with_jpeg_quality(cfg.verification.jpeg_quality);
    let mut frame_loop = FrameLoop::new(
        session,
        Box::new(RefreshScheduler::new(cfg.refresh_hz)),
        cfg.loop_settings(),
    );

    staged(&ui, "Load detection model", || {
        frame_loop.begin_model_load(PendingModel::from_settings(cfg.model.clone())?);
        match frame_loop.wait_for_model(Duration::from_secs(args.model_timeout))? {
            LoopState::Ready => Ok(()),
            state => Err(anyhow!(
                "model not ready after {}s (state {:?})",
                args.model_timeout,
                state
            )),
        }
    })?;

    staged(&ui, "Enable camera", || {
        let source = brand_sentry::open_source(&cfg.source)?;
        frame_loop.enable_camera(source)?;
        Ok(())
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    if !args.no_console {
        let mut tracker = StrokeTracker::new(mask.clone(), cfg.display);
        std::thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                if let Err(e) = console::run_console(stdin.lock(), &mut tracker) {
                    log::warn!("console stopped: {:#}", e);
                }
            })
            .context("spawn console thread")?;
        log::info!(
            "painting console on stdin (display {}x{})",
            cfg.display.0,
            cfg.display.1
        );
    }

    log::info!(
        "sentryd running: source={} brand={}",
        cfg.source.url,
        cfg.verification.target_brand
    );
    let exit = frame_loop.run(&stop)?;

    let in_flight = frame_loop.verifications_in_flight();
    if in_flight > 0 {
        log::info!("waiting for {} in-flight verifications", in_flight);
    }
    frame_loop.wait_for_verifications();
    log::info!("sentryd stopped: {:?} ({})", exit, frame_loop.stats());

    if exit == LoopExit::SourceLost {
        return Err(anyhow!("video source lost: {}", cfg.source.url));
    }
    Ok(())
}

fn staged<T>(ui: &Ui, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let stage = ui.stage(name);
    let result = f();
    if let Err(e) = &result {
        stage.fail(format!("{:#}", e));
    }
    result
}
