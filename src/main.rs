use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lookout::backend::BackendClient;
use lookout::capture::{CaptureEvent, CaptureSource, FrameGrabber, StillImage};
use lookout::config::file::config_file_path;
use lookout::orchestrator::{Settings, Stages};
use lookout::preview::Preview;
use lookout::retry::RetryPolicy;
use lookout::voice::{
    AudioCapture, AudioCue, AudioInput, AudioPlayback, AudioSink, Clip, CueBank, ListenLimits,
    Speaker, SpeechOutput, SpeechToText, Synthesizer, TextToSpeech, VoiceInput,
    calculate_energy, decode_mp3, tone,
};
use lookout::{Command as UserCommand, Config, Mode, Orchestrator, SessionState};

/// Lookout - ask spoken questions about what your camera sees
#[derive(Parser)]
#[command(name = "lookout", version, about)]
struct Cli {
    /// Starting mode: general, street, or kitchen
    #[arg(short, long, global = true)]
    mode: Option<Mode>,

    /// Use a still image instead of a camera
    #[arg(long, value_name = "PATH")]
    still: Option<PathBuf>,

    /// Base URL of the analyze backend
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
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
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Grab a frame from the camera
    TestCamera {
        /// Save the frame as JPEG
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Ask one question about an image file and print the answer
    Ask {
        /// Image to send
        #[arg(long, value_name = "PATH")]
        image: PathBuf,
        /// Question text
        question: String,
    },
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(mut config) => {
            apply_flags(&cli, &mut config);
            config
        }
        Err(e) => {
            init_logging(cli.verbose, None);
            tracing::error!("fatal: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The preview owns the terminal, so the session logs to a file
    let log_file = cli.command.is_none().then(|| config.log_file());
    init_logging(cli.verbose, log_file.as_deref());

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            lookout::preview::restore();
            tracing::error!("fatal: {e:#}");
            eprintln!("lookout: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn apply_flags(cli: &Cli, config: &mut Config) {
    if let Some(mode) = cli.mode {
        config.session.initial_mode = mode;
    }
    if let Some(still) = &cli.still {
        config.camera.still_image = Some(still.clone());
    }
    if let Some(url) = &cli.backend_url {
        config.backend.url.clone_from(url);
    }
}

fn init_logging(verbose: u8, log_file: Option<&Path>) {
    let level = match verbose {
        0 => "info,lookout=info",
        1 => "info,lookout=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file = log_file.and_then(|path| {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

// the microphone stream is not Send, so neither is the test-mic future
#[allow(clippy::future_not_send)]
async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::TestCamera { output } => test_camera(&config, output.as_deref()).await,
            Command::Ask { image, question } => ask(&config, &image, &question).await,
            Command::Config => show_config(&config),
        };
    }

    run_session(config).await
}

/// Interactive session: camera, preview, and the orchestrator
async fn run_session(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(
        mode = %config.session.initial_mode,
        backend = ?config.backend.kind,
        "starting lookout"
    );

    let (camera_tx, camera_rx) = mpsc::unbounded_channel();
    let mut capture = start_capture(&config, camera_tx).await?;

    if let Err(e) = AudioPlayback::probe() {
        tracing::warn!(error = %e, "no audio output, answers will not be heard");
    }

    let stt = SpeechToText::from_config(&config.voice, &config.api_keys)?;
    let tts = TextToSpeech::from_config(&config.voice, &config.api_keys)?;
    let backend = BackendClient::from_config(&config.backend, &config.api_keys)?;

    let speaker = Arc::new(SpeechOutput::new(
        Arc::new(tts),
        Arc::new(AudioPlayback::new()),
        CueBank::load(&config.sounds_dir),
    ));
    let stages = Stages {
        voice: Arc::new(VoiceInput::new(
            Arc::new(stt),
            ListenLimits::from_config(&config.voice),
        )),
        backend: Arc::new(backend),
        speaker: speaker.clone(),
    };

    let session = SessionState::new(
        config.session.initial_mode,
        config.session.reset_history_on_mode_switch,
        config.session.max_history_turns,
    );
    let (orchestrator, handle) = Orchestrator::new(
        session,
        stages,
        capture.slot(),
        Settings::from_config(&config),
    );
    let orchestrator = orchestrator.with_capture_events(camera_rx);

    let mut preview = Preview::spawn(capture.slot(), handle.status.clone(), handle.commands.clone())?;

    let quit = handle.commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = quit.send(UserCommand::Quit);
        }
    });

    let _ = speaker.speak(
        &format!("Lookout ready, {} mode. Press space to ask.", config.session.initial_mode),
        Some(AudioCue::Success),
    );

    let session = orchestrator.run().await;

    preview.stop()?;
    capture.stop();
    tracing::info!(turns = session.history().len(), "session ended");

    Ok(())
}

async fn start_capture(
    config: &Config,
    events: mpsc::UnboundedSender<CaptureEvent>,
) -> anyhow::Result<CaptureSource> {
    let retry = RetryPolicy {
        max_retries: 0,
        base_delay: config.camera.retry_base,
        max_delay: config.camera.retry_max,
    };

    if let Some(path) = config.camera.still_image.clone() {
        return Ok(CaptureSource::start(move || StillImage::new(path), retry, events).await?);
    }

    start_camera(config, retry, events).await
}

#[cfg(feature = "camera")]
async fn start_camera(
    config: &Config,
    retry: RetryPolicy,
    events: mpsc::UnboundedSender<CaptureEvent>,
) -> anyhow::Result<CaptureSource> {
    let (index, fallback) = (config.camera.index, config.camera.fallback_index);
    let factory = move || lookout::capture::NativeCamera::new(index, fallback);
    Ok(CaptureSource::start(factory, retry, events).await?)
}

#[cfg(not(feature = "camera"))]
#[allow(clippy::unused_async)]
async fn start_camera(
    _config: &Config,
    _retry: RetryPolicy,
    _events: mpsc::UnboundedSender<CaptureEvent>,
) -> anyhow::Result<CaptureSource> {
    anyhow::bail!("built without camera support; pass --still PATH")
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::open()?;
    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_samples();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with the built-in cues and a tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output on {}...", AudioPlayback::probe()?);

    let cues = CueBank::builtin();
    let mut clips = AudioCue::ALL
        .iter()
        .map(|cue| (cue.file_name(), cues.clip(*cue).clone()))
        .collect::<Vec<_>>();
    clips.push(("440 Hz", tone(&[(440.0, Duration::from_secs(2))], 0.3)));

    for (name, clip) in clips {
        println!("Playing {name} ({:.1}s)", clip.duration().as_secs_f32());
        play_clip(clip).await?;
    }

    println!("\n---");
    println!("If you heard the tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = TextToSpeech::from_config(&config.voice, &config.api_keys)?;

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    let clip = decode_mp3(&mp3_data)?;
    println!("Playing {:.1}s of audio...", clip.duration().as_secs_f32());
    play_clip(clip).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

async fn play_clip(clip: Clip) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || AudioPlayback::new().play(&clip, &CancellationToken::new()))
        .await??;
    Ok(())
}

/// Grab a frame and report what arrived
async fn test_camera(config: &Config, output: Option<&Path>) -> anyhow::Result<()> {
    let (events, _events_rx) = mpsc::unbounded_channel();
    let mut capture = start_capture(config, events).await?;
    println!("Opened {}", capture.device());

    let mut slot = capture.slot();
    let frame = match slot.current() {
        Some(frame) => frame,
        None => {
            tokio::time::timeout(Duration::from_secs(5), slot.changed())
                .await
                .map_err(|_| anyhow::anyhow!("no frame within 5 seconds"))??;
            slot.current()
                .ok_or_else(|| anyhow::anyhow!("camera produced no frame"))?
        }
    };
    println!("Frame {}: {}x{}", frame.seq(), frame.width(), frame.height());

    if let Some(path) = output {
        let encoded = frame.encode_jpeg(config.backend.jpeg_quality, 0)?;
        std::fs::write(path, &encoded.bytes)?;
        println!("Saved {} bytes to {}", encoded.bytes.len(), path.display());
    }

    capture.stop();
    Ok(())
}

/// One-shot request about an image file, without audio
async fn ask(config: &Config, image: &Path, question: &str) -> anyhow::Result<()> {
    config.validate()?;

    let mut still = StillImage::new(image);
    still.open()?;
    let (mut writer, _slot) = lookout::capture::frame_slot();
    let frame = writer.publish(still.grab()?)?;
    still.close();

    let mut session = SessionState::new(
        config.session.initial_mode,
        config.session.reset_history_on_mode_switch,
        config.session.max_history_turns,
    );
    let pending = session.begin_capture(frame);
    let encoded = pending
        .frame()
        .encode_jpeg(config.backend.jpeg_quality, config.backend.max_image_dim)?;
    let request = session.dispatch(&pending, question, Some(encoded));

    let backend = BackendClient::from_config(&config.backend, &config.api_keys)?;
    tracing::info!(
        backend = backend.transport_name(),
        mode = %request.mode,
        "sending question"
    );

    let answer = backend.ask(&request, &CancellationToken::new()).await?;
    println!("{answer}");

    Ok(())
}

/// Print the resolved configuration with keys redacted
fn show_config(config: &Config) -> anyhow::Result<()> {
    match config_file_path() {
        Some(path) if path.exists() => println!("config file: {}", path.display()),
        Some(path) => println!("config file: {} (not found)", path.display()),
        None => println!("config file: unavailable"),
    }
    println!("log file: {}", config.log_file().display());
    println!("sounds: {}", config.sounds_dir.display());
    println!();
    println!("{:#?}", config.camera);
    println!("{:#?}", config.voice);
    println!("{:#?}", config.backend);
    println!("{:#?}", config.session);

    let present = config.api_keys.present();
    if present.is_empty() {
        println!("api keys: none");
    } else {
        println!("api keys: {}", present.join(", "));
    }

    if let Err(e) = config.validate() {
        println!("\ninvalid: {e}");
    }
    Ok(())
}
