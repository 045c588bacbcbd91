mod wav;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use radiodecode_core::{
    control_channel, CwKeyer, DecodedData, DecoderConfig, DecoderError, DecoderMode, DecoderSupervisor,
    FrameExchange, ProducerLoop, RttyKeyer,
};
use serde::Deserialize;
use thiserror::Error;

use crate::wav::{read_wav, write_wav, WavSource};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Config file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Decoder(#[from] DecoderError),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    #[error("No decoder mode given (use --mode or set \"mode\" in the config file)")]
    MissingMode,

    #[error("Producer thread panicked")]
    ProducerPanicked,
}

#[derive(Parser)]
#[command(name = "radiodecode")]
#[command(about = "Adaptive CW and RTTY decoder")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a WAV recording
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Decoder mode: cw or rtty
        #[arg(short, long)]
        mode: Option<DecoderMode>,

        /// CW tone to listen on (Hz)
        #[arg(long)]
        cw_freq: Option<f32>,

        /// RTTY mark tone (Hz)
        #[arg(long)]
        mark: Option<f32>,

        /// RTTY shift (Hz)
        #[arg(long)]
        shift: Option<f32>,

        /// RTTY baud rate
        #[arg(long)]
        baud: Option<f32>,

        /// Samples handed to the decoder per block
        #[arg(long)]
        block_size: Option<usize>,

        /// Use the fixed tone threshold instead of the adaptive one
        #[arg(long)]
        fixed_threshold: bool,

        /// Feed the file at its real sampling rate
        #[arg(long)]
        realtime: bool,

        /// JSON file with decoder settings; flags override it
        #[arg(long, value_name = "FILE.JSON")]
        config: Option<PathBuf>,
    },

    /// Render text as Morse audio
    SynthCw {
        text: String,

        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[arg(long, default_value = "20")]
        wpm: f32,

        #[arg(long, default_value = "800")]
        freq: f32,

        #[arg(long, default_value = "8000")]
        rate: u32,
    },

    /// Render text as RTTY audio
    SynthRtty {
        text: String,

        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[arg(long, default_value = "2125")]
        mark: f32,

        #[arg(long, default_value = "170")]
        shift: f32,

        #[arg(long, default_value = "45.45")]
        baud: f32,

        #[arg(long, default_value = "8000")]
        rate: u32,
    },
}

/// Decoder settings file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    mode: Option<String>,
    sample_rate: Option<u32>,
    block_size: Option<usize>,
    bandwidth: Option<u32>,
    cw_center: Option<f32>,
    rtty_mark: Option<f32>,
    rtty_shift: Option<f32>,
    rtty_baud: Option<f32>,
    adaptive_threshold: Option<bool>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

struct DecodeArgs {
    mode: Option<DecoderMode>,
    cw_freq: Option<f32>,
    mark: Option<f32>,
    shift: Option<f32>,
    baud: Option<f32>,
    block_size: Option<usize>,
    fixed_threshold: bool,
}

/// Merge file settings and flags into one config; flags win
fn build_config(file: ConfigFile, args: &DecodeArgs, wav_rate: u32) -> Result<(DecoderConfig, bool), CliError> {
    let file_mode = file.mode.as_deref().map(|m| m.parse::<DecoderMode>()).transpose()?;
    let mode = args.mode.or(file_mode).ok_or(CliError::MissingMode)?;

    if let Some(rate) = file.sample_rate.filter(|&r| r != wav_rate) {
        log::warn!("Ignoring sample_rate {} from config file, the WAV file is {} Hz", rate, wav_rate);
    }

    let config = DecoderConfig {
        mode,
        sample_rate: wav_rate,
        block_size: args.block_size.or(file.block_size).unwrap_or(0),
        bandwidth: file.bandwidth.unwrap_or(0),
        cw_center: args.cw_freq.or(file.cw_center),
        rtty_mark: args.mark.or(file.rtty_mark),
        rtty_shift: args.shift.or(file.rtty_shift),
        rtty_baud: args.baud.or(file.rtty_baud),
    };
    let adaptive = !args.fixed_threshold && file.adaptive_threshold.unwrap_or(true);
    Ok((config, adaptive))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Decode {
            input,
            mode,
            cw_freq,
            mark,
            shift,
            baud,
            block_size,
            fixed_threshold,
            realtime,
            config,
        } => {
            let args = DecodeArgs { mode, cw_freq, mark, shift, baud, block_size, fixed_threshold };
            decode_command(&input, &args, config.as_deref(), realtime)?
        }
        Commands::SynthCw { text, output, wpm, freq, rate } => synth_cw_command(&text, &output, wpm, freq, rate)?,
        Commands::SynthRtty { text, output, mark, shift, baud, rate } => {
            synth_rtty_command(&text, &output, mark, shift, baud, rate)?
        }
    }

    Ok(())
}

fn decode_command(
    input_path: &Path,
    args: &DecodeArgs,
    config_path: Option<&Path>,
    realtime: bool,
) -> Result<(), CliError> {
    let audio = read_wav(input_path)?;
    println!("Read WAV: {} Hz, {} samples", audio.sample_rate, audio.samples.len());

    let file = match config_path {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let (config, adaptive) = build_config(file, args, audio.sample_rate)?;

    let data = Arc::new(DecodedData::new());
    let frames = Arc::new(FrameExchange::new());
    let (mut client, server) = control_channel();
    let mut source = WavSource::new(audio, realtime);
    if !realtime {
        // Faster than realtime: never outrun the text buffer
        source = source.with_backpressure(Arc::clone(&data));
    }
    info!("Decoding {:.1} s of audio", source.duration().as_secs_f32());

    // Producer context: owns the decoder, runs until the file is used up
    let stop = Arc::new(AtomicBool::new(false));
    let producer_stop = Arc::clone(&stop);
    let mut producer = ProducerLoop::new(DecoderSupervisor::new(Arc::clone(&data)), server, frames, source);
    let handle = std::thread::spawn(move || producer.run(&producer_stop));

    // Consumer context: configure, then drain text until the producer is done
    let configured = client
        .set_adaptive_threshold(adaptive)
        .and_then(|()| client.set_config(&config));
    if let Err(err) = configured {
        stop.store(true, Ordering::Relaxed);
        let _ = handle.join();
        return Err(err.into());
    }

    let mut stdout = std::io::stdout();
    let mut decoded = String::new();
    while !handle.is_finished() {
        let text = data.drain_text();
        if !text.is_empty() {
            write!(stdout, "{}", text)?;
            stdout.flush()?;
            decoded.push_str(&text);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    let blocks = handle.join().map_err(|_| CliError::ProducerPanicked)?;
    let text = data.drain_text();
    write!(stdout, "{}", text)?;
    decoded.push_str(&text);
    writeln!(stdout)?;

    let status = data.status();
    println!("Decoded {} characters in {} blocks", decoded.trim().chars().count(), blocks);
    match config.mode {
        DecoderMode::Cw => println!("CW: {} WPM at {:.0} Hz", status.cw_wpm, status.cw_freq),
        DecoderMode::Rtty => println!(
            "RTTY: mark {:.0} Hz, space {:.0} Hz, {:.2} baud, {}",
            status.rtty_mark,
            status.rtty_space,
            status.rtty_baud,
            if status.rtty_locked { "locked" } else { "unlocked" }
        ),
        _ => {}
    }
    let dropped = data.text.dropped();
    if dropped > 0 {
        log::warn!("{} characters dropped, consumer fell behind", dropped);
    }
    Ok(())
}

fn synth_cw_command(text: &str, output_path: &Path, wpm: f32, freq: f32, rate: u32) -> Result<(), CliError> {
    let keyer = CwKeyer::new(rate, freq, wpm);
    // Half a second of lead-in, three seconds of tail so the last word is flushed
    let mut samples = keyer.silence(rate as usize / 2);
    samples.extend(keyer.render(text));
    samples.extend(keyer.silence(rate as usize * 3));

    write_wav(output_path, rate, &samples)?;
    println!("Wrote {} samples of CW ({} WPM, {} Hz) to {}", samples.len(), wpm, freq, output_path.display());
    Ok(())
}

fn synth_rtty_command(
    text: &str,
    output_path: &Path,
    mark: f32,
    shift: f32,
    baud: f32,
    rate: u32,
) -> Result<(), CliError> {
    let mut keyer = RttyKeyer::new(rate, mark, shift, baud);
    let mut samples = keyer.idle(10.0);
    // RY keeps the receiver's bit clock busy while it locks
    samples.extend(keyer.render("RYRYRYRYRYRY "));
    samples.extend(keyer.render(text));
    samples.extend(keyer.idle(10.0));

    write_wav(output_path, rate, &samples)?;
    println!(
        "Wrote {} samples of RTTY ({} Hz mark, {} Hz shift, {} baud) to {}",
        samples.len(),
        mark,
        shift,
        baud,
        output_path.display()
    );
    Ok(())
}
