use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use atlas_voice::voice::{
    AudioSink, AudioSource, CpalSink, CpalSource, SynthesizedAudio, Synthesizer,
};
use atlas_voice::{Config, Daemon};

/// Atlas - wake-word voice assistant
#[derive(Parser)]
#[command(name = "atlas", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/atlas/config.toml)
    #[arg(short, long, env = "ATLAS_CONFIG")]
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
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Validate and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,atlas_voice=info",
        1 => "info,atlas_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(config_path, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(config_path, &text).await,
            Command::CheckConfig => check_config(config_path),
        };
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting atlas");

    let config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config)?;
    let summary = daemon.run().await?;

    println!(
        "Session: {} trigger(s), {} reply(ies), {} empty, {} failed",
        summary.triggers, summary.completed, summary.empty, summary.failed
    );
    Ok(())
}

/// Test microphone input
async fn test_mic(config_path: Option<&std::path::Path>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let format = config.audio.format;
    let threshold = config.audio.endpoint.silence_threshold;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = CpalSource::open(format)?;
    println!(
        "Format: {} Hz, {} channel(s), {} samples/frame",
        format.sample_rate, format.channels, format.frame_size
    );
    println!("Silence threshold: {threshold}");
    println!("---");

    let frames_per_second = format.frames_for(1.0).max(1);
    for i in 0..duration {
        let mut total = 0.0;
        let mut peak = 0.0f64;
        for _ in 0..frames_per_second {
            let frame = source.read_frame().await?;
            let amplitude = frame.mean_amplitude();
            total += amplitude;
            peak = peak.max(amplitude);
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = total / frames_per_second as f64;

        // Visual meter, full scale at 4x the silence threshold
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = ((mean / (f64::from(threshold.max(1)) * 4.0)) * 50.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if mean >= f64::from(threshold) { "voiced" } else { "silent" };

        println!(
            "[{:2}s] mean: {:7.1} | peak: {:7.1} | [{}] {marker}",
            i + 1,
            mean,
            peak,
            meter
        );
    }

    source.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let audio = SynthesizedAudio::new(samples, sample_rate, 1);
    tokio::task::spawn_blocking(move || CpalSink::new().play(&audio, &CancellationToken::new()))
        .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output through the configured synthesizer
async fn test_tts(config_path: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let daemon = Daemon::new(Config::load(config_path)?)?;
    let synthesizer = daemon.synthesizer()?;

    println!("Synthesizing speech with {}...", synthesizer.name());
    let audio = synthesizer.synthesize(text).await?;
    println!(
        "Got {} samples at {} Hz ({:.1}s)",
        audio.samples.len(),
        audio.sample_rate,
        audio.duration().as_secs_f64()
    );

    println!("Playing audio...");
    let sink: Arc<dyn AudioSink> = Arc::new(CpalSink::new());
    tokio::task::spawn_blocking(move || sink.play(&audio, &CancellationToken::new())).await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print the effective configuration and validate it
fn check_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    println!("{config}\n");
    config.validate()?;
    println!("Configuration OK");
    Ok(())
}
