use std::f32::consts::PI;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use talkback_client::audio::{
    AudioOutput, CaptureSource, CpalOutput, CpalSource, DecodedAudio, WavFileSource, decode_reply,
    rms,
};
use talkback_client::{
    AgentHandle, BackendClient, Config, Console, Recorder, VoiceAgent, VoiceBackend,
};

/// Talkback - push-to-talk voice client for a speech chat backend
#[derive(Parser)]
#[command(name = "talkback", version, about)]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, env = "TALKBACK_BASE_URL")]
    base_url: Option<String>,

    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message through chat and speak the reply
    Ask {
        /// Message text
        text: String,

        /// Print the reply without playing it
        #[arg(long)]
        mute: bool,
    },
    /// Transcribe a WAV file through the capture pipeline
    Transcribe {
        /// Path to the WAV file
        #[arg(long)]
        wav: PathBuf,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,talkback_client=info",
        1 => "info,talkback_client=debug",
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
    let config = Config::load(cli.config.as_deref(), cli.base_url.as_deref())?;

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Ask { text, mute } => ask(&config, &text, mute).await,
            Command::Transcribe { wav } => transcribe_file(&config, &wav).await,
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    voice_loop(config).await
}

/// Interactive push-to-talk loop
///
/// Enter starts listening, finalizes a take, or cancels work in flight. The
/// capture stream is not `Send`, so the agent runs on the main task and only
/// stdin gets its own thread.
#[allow(clippy::future_not_send)]
async fn voice_loop(config: Config) -> anyhow::Result<()> {
    let backend = BackendClient::new(&config.backend)?;
    let source = CpalSource::new(config.capture.input_device.as_deref())?;
    let output = CpalOutput::new()?;
    let recorder = Recorder::new(source, config.endpoint, config.capture.target_sample_rate);

    let (agent, handle) = VoiceAgent::new(
        config.interaction,
        recorder,
        backend,
        output,
        Console::new(),
    );
    spawn_input_thread(handle);

    tracing::info!(base_url = %config.backend.base_url, "talkback ready");

    tokio::select! {
        () = agent.run() => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            tracing::info!("interrupted, shutting down");
        }
    }

    Ok(())
}

/// Forward Enter presses from stdin as user actions
///
/// Runs on a plain thread because stdin reads block. The thread owns the only
/// [`AgentHandle`], so EOF closes the action channel and the agent shuts down.
fn spawn_input_thread(handle: AgentHandle) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if !handle.user_action_blocking() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
}

/// Send one message through chat, print the reply, and speak it
#[allow(clippy::future_not_send)]
async fn ask(config: &Config, text: &str, mute: bool) -> anyhow::Result<()> {
    let backend = BackendClient::new(&config.backend)?;

    let reply = backend.chat(text).await?;
    if reply.is_empty() {
        println!("(empty reply)");
        return Ok(());
    }
    println!("{reply}");

    if !mute {
        let speech = backend.synthesize(&reply).await?;
        let audio = decode_reply(&speech.bytes, speech.content_type.as_deref())?;
        let mut output = CpalOutput::new()?;
        output.play(audio)?.finished().await;
    }

    Ok(())
}

/// Feed a WAV file through the capture pipeline and print the transcript
#[allow(clippy::future_not_send)]
async fn transcribe_file(config: &Config, wav: &Path) -> anyhow::Result<()> {
    let source = WavFileSource::load(wav)?;
    let mut recorder = Recorder::new(source, config.endpoint, config.capture.target_sample_rate);

    recorder.start()?;
    loop {
        if recorder.pump()?.finished() {
            break;
        }
    }
    let utterance = recorder.stop()?;
    tracing::debug!(
        wav_bytes = utterance.wav.len(),
        duration_ms = utterance.duration.as_millis(),
        "file finalized"
    );

    let backend = BackendClient::new(&config.backend)?;
    let transcript = backend.transcribe(utterance.wav).await?;
    println!("{transcript}");

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = CpalSource::new(config.capture.input_device.as_deref())?;
    source.open()?;

    println!("Sample rate: {} Hz", source.sample_rate());
    println!("---");

    let mut session_peak = 0.0_f32;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = source.read_frames()?;
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
        session_peak = session_peak.max(energy);

        // Visual meter
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
    source.close();

    println!("\n---");
    if session_peak >= config.endpoint.silence_threshold_rms {
        println!("Your mic is picking up audio above the voice threshold.");
    } else {
        println!(
            "RMS never crossed the voice threshold ({}). Check:",
            config.endpoint.silence_threshold_rms
        );
        println!("  1. Is your mic plugged in?");
        println!("  2. Run: pactl info | grep 'Default Source'");
        println!("  3. Run: arecord -l (to list devices)");
        println!("  4. Try: pavucontrol (to check levels)");
    }

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let mut output = CpalOutput::new()?;
    output.play(DecodedAudio { samples, sample_rate })?.finished().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
