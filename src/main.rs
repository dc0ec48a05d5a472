use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chime::audio::{AudioParams, AudioPipeline, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use chime::{Config, Daemon};

/// Chime - voice-assistant client
#[derive(Parser)]
#[command(name = "chime", version, about)]
struct Cli {
    /// Path to a config file (defaults to ~/.config/chime/config.toml)
    #[arg(short, long, env = "CHIME_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket server URL override
    #[arg(long, env = "CHIME_SERVER_URL")]
    server_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to a WAV file
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,chime=info",
        1 => "info,chime=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, dump } => test_mic(duration, dump).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(url) = cli.server_url {
        config.server.websocket_url = url;
    }

    tracing::info!(
        url = %config.server.websocket_url,
        wake = config.wake.enabled,
        "starting chime"
    );

    let daemon = Daemon::new(config);
    daemon.run().await?;

    Ok(())
}

/// Test microphone input with a level meter, optionally dumping a WAV.
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, dump: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut pipeline = AudioPipeline::new(AudioParams::default())?;
    pipeline.initialize()?;
    let handle = pipeline.handle();

    let mut captured: Vec<i16> = Vec::new();

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut second: Vec<i16> = Vec::new();
        while let Some(frame) = handle.pop_wake_frame() {
            second.extend(frame);
        }

        let energy = calculate_rms(&second);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | [{meter}]", i + 1);

        captured.extend(second);
    }

    pipeline.close();

    if let Some(path) = dump {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: INPUT_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in &captured {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
        println!("\nWrote {} samples to {}", captured.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");

    Ok(())
}

/// RMS of i16 samples, normalized to [0, 1].
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let f = f32::from(s) / 32768.0;
            f * f
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine tone.
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let params = AudioParams::default();
    let mut pipeline = AudioPipeline::new(params)?;
    pipeline.initialize()?;
    let handle = pipeline.handle();

    let frame_size = params.output_frame_size();
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let frames = (2000 / params.frame_duration_ms) as usize;

    let mut t = 0usize;
    for _ in 0..frames {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let frame: Vec<i16> = (0..frame_size)
            .map(|i| {
                let time = (t + i) as f32 / OUTPUT_SAMPLE_RATE as f32;
                let sample = (2.0 * std::f32::consts::PI * frequency * time).sin() * 0.3;
                (sample * 32767.0) as i16
            })
            .collect();
        t += frame_size;
        handle.enqueue_playback(frame);
    }

    handle.wait_for_audio_complete(Duration::from_secs(5)).await;
    pipeline.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}
