use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use earshot::voice::{self, FrameSource, strip_wake_word};
use earshot::{Config, Listener, MicSource, PhraseSpotter, WhisperTranscriber};

/// How often blocking waits wake up to check the audio device is still alive
const DEVICE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Earshot - always-on wake word listener
#[derive(Parser)]
#[command(name = "earshot", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/earshot/config.toml)
    #[arg(short, long, env = "EARSHOT_CONFIG")]
    config: Option<PathBuf>,

    /// Input device name
    #[arg(long)]
    device: Option<String>,

    /// Save each utterance as WAV into this directory
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake word and print transcribed commands (default)
    Listen,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Print the resolved configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,earshot=info",
        1 => "info,earshot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(device) = cli.device {
        config.input_device = Some(device);
    }
    if let Some(dir) = cli.save_dir {
        config.save_dir = Some(dir);
    }

    match cli.command.unwrap_or(Command::Listen) {
        Command::Listen => listen(&config),
        Command::TestMic { duration } => test_mic(&config, duration),
        Command::Config => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

/// Conversation loop: wake word, utterance, transcript
fn listen(config: &Config) -> anyhow::Result<()> {
    if let Some(dir) = &config.save_dir {
        std::fs::create_dir_all(dir)?;
    }

    let transcriber = WhisperTranscriber::new(&config.stt)?;
    let spotter = PhraseSpotter::new(config.wake_words.clone(), transcriber.clone())?;

    let listener_config = config.listener.clone();
    let device = config.input_device.clone();
    let mut listener = Listener::start(
        &config.listener,
        move || MicSource::open(&listener_config, device.as_deref()),
        spotter,
        transcriber,
    )?;

    tracing::info!(wake_words = ?config.wake_words, "earshot ready");

    let mut utterances: u64 = 0;
    loop {
        let spotted = wait_while_alive(&mut listener, |l| {
            l.wait_for_wake_word_timeout(DEVICE_CHECK_INTERVAL)
        })?;

        let lower = spotted.to_lowercase();
        let trailing = config
            .wake_words
            .iter()
            .find(|w| lower.contains(w.as_str()))
            .map(|w| strip_wake_word(&spotted, w))
            .unwrap_or_default();
        tracing::info!(spotted = %spotted, trailing = %trailing, "wake word heard, listening");

        let utterance = wait_while_alive(&mut listener, |l| {
            l.wait_for_utterance_timeout(DEVICE_CHECK_INTERVAL)
        })?;
        utterances += 1;

        if let Some(dir) = &config.save_dir {
            let path = dir.join(format!("utterance-{utterances:04}.wav"));
            if let Err(e) = utterance.save_wav(&path) {
                tracing::warn!(error = %e, path = %path.display(), "failed to save utterance");
            }
        }

        // Transcript is latched before the utterance signal, or never
        match listener.try_transcript() {
            Some(text) if !text.is_empty() => println!("{text}"),
            Some(_) => tracing::info!("nothing was said"),
            None => tracing::warn!(
                duration_ms = utterance.duration().as_millis(),
                "utterance produced no transcript"
            ),
        }
    }
}

/// Repeat a timed wait until it yields, failing if the producer has died
fn wait_while_alive<T>(
    listener: &mut Listener,
    wait: impl Fn(&Listener) -> Option<T>,
) -> anyhow::Result<T> {
    loop {
        if let Some(value) = wait(listener) {
            return Ok(value);
        }
        if listener.producer_finished() {
            listener.shutdown()?;
            anyhow::bail!("audio capture stopped");
        }
    }
}

/// Test microphone input
fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = MicSource::open(&config.listener, config.input_device.as_deref())?;

    println!("Sample rate: {} Hz", config.listener.sample_rate);
    println!("---");

    for i in 0..duration {
        let started = Instant::now();
        let mut frames = Vec::new();
        while started.elapsed() < Duration::from_secs(1) {
            match source.read_frame() {
                Ok(frame) => frames.push(frame),
                Err(e @ voice::ReadError::Transient(_)) => println!("  ({e})"),
                Err(e) => return Err(e.into()),
            }
        }

        let energy = voice::vad::score(&frames);
        let peak = frames
            .iter()
            .flat_map(|f| f.samples())
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy / 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:7.1} | Peak: {:5} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}
