use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use astra_voice::console;
use astra_voice::session::{EventSink, SessionEvent, SessionOrchestrator, SessionState};
use astra_voice::transport::{TransportClient, WsSocket};
use astra_voice::voice::{
    AudioCaptureController, AudioPlaybackController, CaptureEvent, CaptureParams, CpalMicrophone,
    CpalSpeaker, PlaybackOutcome, samples_to_wav,
};
use astra_voice::Config;

/// Astra - push-to-talk voice client for a conversational listener service
#[derive(Parser)]
#[command(name = "astra", version, about)]
struct Cli {
    /// Listener service WebSocket endpoint
    #[arg(short, long, env = "ASTRA_SERVER_URL")]
    server: Option<String>,

    /// Config file (defaults to ~/.config/astra/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

/// How the interactive session ended
enum Exit {
    Ended(SessionState),
    Interrupted,
    Quit,
    InputFailed(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,astra_voice=info",
        1 => "info,astra_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.server, cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        match cmd {
            Command::TestMic { duration } => test_mic(duration, config.capture).await?,
            Command::TestSpeaker => test_speaker().await?,
        }
        return Ok(ExitCode::SUCCESS);
    }

    run_session(config).await
}

/// Interactive push-to-talk session
#[allow(clippy::future_not_send)]
async fn run_session(config: Config) -> anyhow::Result<ExitCode> {
    tracing::info!(server = %config.server_url, "starting astra");

    let (events, mut rx) = EventSink::channel();
    let capture = AudioCaptureController::new(Box::new(CpalMicrophone::new()), config.capture);
    let playback = AudioPlaybackController::new(Box::new(CpalSpeaker::new()?));
    let transport = TransportClient::new(Box::new(WsSocket::new(config.server_url.clone())));

    let mut session =
        SessionOrchestrator::new(capture, playback, transport, config.framing, events.clone());

    let printer = tokio::spawn(console::print_status(session.subscribe()));
    let mut input = console::spawn_input(
        std::io::BufReader::new(std::io::stdin()),
        session.subscribe(),
        events,
    );

    session.start();

    let exit = tokio::select! {
        state = session.run(&mut rx) => Exit::Ended(state),
        _ = tokio::signal::ctrl_c() => Exit::Interrupted,
        finished = &mut input => match finished {
            Ok(Ok(())) => Exit::Quit,
            Ok(Err(e)) => Exit::InputFailed(e.to_string()),
            Err(_) => Exit::InputFailed("input thread stopped".to_string()),
        },
    };

    if let Exit::InputFailed(reason) = &exit {
        session.handle(SessionEvent::Fault(format!("terminal input failed: {reason}")));
    }

    // A read still pending on the input thread is abandoned at exit
    session.shutdown();

    // Closing the status channel lets the printer flush the last snapshot and exit
    drop(session);
    if let Err(e) = printer.await {
        tracing::debug!(error = %e, "status printer ended abnormally");
    }

    let code = match exit {
        Exit::Ended(state) => {
            tracing::info!(%state, "session ended");
            ExitCode::FAILURE
        }
        Exit::InputFailed(_) => ExitCode::FAILURE,
        Exit::Interrupted => {
            tracing::info!("interrupted");
            ExitCode::SUCCESS
        }
        Exit::Quit => ExitCode::SUCCESS,
    };

    Ok(code)
}

/// Record through the capture controller and print a level meter per second
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, params: CaptureParams) -> anyhow::Result<()> {
    let (events, mut rx) = EventSink::channel();
    let mut capture = AudioCaptureController::new(Box::new(CpalMicrophone::new()), params);
    let id = capture.begin(&events)?;

    println!(
        "Recording {duration}s (requested {} Hz, {} ch, {}-bit). Say something.",
        params.sample_rate, params.channels, params.bits_per_sample
    );

    for second in 1..=duration {
        let tick = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(tick);

        let mut window = Vec::new();
        loop {
            tokio::select! {
                () = &mut tick => break,
                Some(event) = rx.recv() => match event {
                    SessionEvent::Capture(CaptureEvent::Fragment { capture: from, bytes }) => {
                        window.extend_from_slice(&bytes);
                        capture.accept(CaptureEvent::Fragment { capture: from, bytes });
                    }
                    SessionEvent::Capture(failed @ CaptureEvent::Failed { .. }) => {
                        if let Some(error) = capture.accept(failed) {
                            anyhow::bail!("microphone failed: {error}");
                        }
                    }
                    _ => {}
                },
            }
        }

        let level = Level::of(&pcm16_samples(&window));
        println!(
            "{second:>3}s  {:>7} B  rms {:.3}  peak {:.3}  |{}|",
            window.len(),
            level.rms,
            level.peak,
            level.bar(40)
        );
    }

    let clip = capture.end();
    let format = clip.format();
    println!(
        "capture {}: {} bytes, {} Hz, {} ch",
        id.0,
        clip.len(),
        format.sample_rate,
        format.channels
    );
    if clip.is_empty() {
        println!("No audio arrived. Check the default input device (arecord -l, pactl info).");
    }

    Ok(())
}

/// Signal level of one window of samples
struct Level {
    rms: f32,
    peak: f32,
}

impl Level {
    #[allow(clippy::cast_precision_loss)]
    fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, peak: 0.0 };
        }
        let power = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        Self {
            rms: power.sqrt(),
            peak: samples.iter().fold(0.0_f32, |m, s| m.max(s.abs())),
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn bar(&self, width: usize) -> String {
        let filled = ((self.rms * 2.0).min(1.0) * width as f32) as usize;
        format!("{}{}", "=".repeat(filled), " ".repeat(width - filled))
    }
}

/// Little-endian 16-bit PCM as normalized floats
fn pcm16_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / f32::from(i16::MAX))
        .collect()
}

/// A sine tone at 30% amplitude
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as f32;
    let step = 2.0 * std::f32::consts::PI * frequency / rate;
    (0..(rate * seconds) as usize)
        .map(|n| (step * n as f32).sin() * 0.3)
        .collect()
}

/// Play a tone through the playback controller and wait for it to finish
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    const TONE_RATE: u32 = 24000;

    let wav = samples_to_wav(&tone(440.0, 2.0, TONE_RATE), TONE_RATE)?;

    let (events, mut rx) = EventSink::channel();
    let mut playback = AudioPlaybackController::new(Box::new(CpalSpeaker::new()?));

    println!("Playing a 2s 440 Hz tone ({} bytes of WAV)...", wav.len());
    playback.play(&wav, &events)?;

    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("playback did not finish in time"))?
            .ok_or_else(|| anyhow::anyhow!("playback events closed"))?;

        let SessionEvent::Playback(event) = event else {
            continue;
        };

        match playback.accept(&event) {
            Some(PlaybackOutcome::Started) => println!("output stream started"),
            Some(PlaybackOutcome::Finished) => break,
            Some(PlaybackOutcome::Failed(error)) => anyhow::bail!("playback failed: {error}"),
            None => {}
        }
    }

    println!("Done. Silence means the default output device is wrong (pactl list sinks short).");
    Ok(())
}
