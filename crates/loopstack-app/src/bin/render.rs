//! Offline looper render
//!
//! Plays a WAV file into the looper as if it were the live input, applies a
//! timed command script and writes the master output to a WAV file. Runs
//! the same processor the audio callback runs, block by block.

use anyhow::{Context, Result};
use clap::Parser;
use hound::{WavReader, WavWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use loopstack_app::command::{Command, Cue, apply, parse_script, status_line};
use loopstack_app::{init_tracing, load_settings};
use loopstack_audio::{InputSpec, LoopEngine};

const OUTPUT_CHANNELS: usize = 2;

/// Offline looper render
#[derive(Parser, Debug)]
#[command(name = "loopstack-render")]
#[command(about = "Render a scripted looper session from a WAV file", long_about = None)]
struct Args {
    /// Input WAV file (the performer)
    #[arg(short, long)]
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Command script: one `<seconds> <command>` per line
    #[arg(short, long)]
    script: PathBuf,

    /// Engine configuration (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds of silence rendered after the input ends
    #[arg(long, default_value_t = 0.0)]
    tail: f32,
}

fn main() -> Result<()> {
    init_tracing("loopstack=info");
    let args = Args::parse();

    let (samples, spec) = read_wav(&args.input)?;
    let channels = usize::from(spec.channels);

    let mut settings = load_settings(args.config.as_deref())?;
    if settings.sample_rate != spec.sample_rate {
        tracing::info!(
            "Running at the input's {} Hz instead of {} Hz",
            spec.sample_rate,
            settings.sample_rate
        );
        settings.sample_rate = spec.sample_rate;
    }
    let block_size = settings.block_size;

    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script: {}", args.script.display()))?;
    let cues = parse_script(&script, spec.sample_rate)?;
    tracing::info!("Loaded {} cues", cues.len());

    let input = InputSpec {
        channels,
        sample_rate: spec.sample_rate,
    };
    let (mut looper, mut processor) = LoopEngine::new(settings, input)?;
    looper.subscribe(|t| tracing::info!("[track {}] {} -> {}", t.track, t.from, t.to));

    let input_frames = samples.len() / channels;
    let tail_frames = (args.tail.max(0.0) * spec.sample_rate as f32) as usize;
    let total = input_frames + tail_frames;

    let mut output = vec![0.0_f32; total * OUTPUT_CHANNELS];
    let silence = vec![0.0_f32; block_size * channels];
    let mut cues = cues.into_iter().peekable();
    let mut frame = 0;
    // The looper's timers follow rendered audio, not the host clock
    let start = Instant::now();

    while frame < total {
        // Cues land on block boundaries
        while let Some(cue) = cues.next_if(|cue| cue.frame <= frame as u64) {
            if !run_cue(&mut looper, &cue)? {
                tracing::info!("Quit at {:.2}s", frame as f32 / spec.sample_rate as f32);
                output.truncate(frame * OUTPUT_CHANNELS);
                return finish(&args.output, &output, spec.sample_rate, &looper);
            }
        }

        let frames = (total - frame).min(block_size);
        let block_input = if frame + frames <= input_frames {
            &samples[frame * channels..(frame + frames) * channels]
        } else if frame < input_frames {
            // Missing frames are rendered as silence
            &samples[frame * channels..]
        } else {
            &silence[..frames * channels]
        };
        processor.render(
            block_input,
            &mut output[frame * OUTPUT_CHANNELS..(frame + frames) * OUTPUT_CHANNELS],
            OUTPUT_CHANNELS,
        );
        frame += frames;
        looper.poll_at(start + Duration::from_secs_f64(frame as f64 / f64::from(spec.sample_rate)));
    }

    for cue in cues {
        tracing::warn!("Cue after the end of the render ignored: {}", cue.command);
    }
    finish(&args.output, &output, spec.sample_rate, &looper)
}

/// Returns false on `quit`.
fn run_cue(looper: &mut LoopEngine, cue: &Cue) -> Result<bool> {
    match &cue.command {
        Command::Quit => return Ok(false),
        Command::Status => tracing::info!("{}", status_line(looper)),
        Command::Devices | Command::Input(_) | Command::Output(_) => {
            tracing::warn!("{} has no effect offline", cue.command);
        }
        command => {
            if !apply(looper, command)? {
                tracing::warn!("{} ignored while {}", command, looper.state());
            }
        }
    }
    Ok(true)
}

fn finish(path: &Path, output: &[f32], sample_rate: u32, looper: &LoopEngine) -> Result<()> {
    write_wav(path, output, sample_rate)?;
    for track in 0..looper.track_count() {
        if let Some(frames) = looper.loop_length(track) {
            tracing::info!(
                "Track {}: {:.2}s loop",
                track,
                frames as f32 / sample_rate as f32
            );
        }
    }
    tracing::info!("Done! Output written to {:?}", path);
    Ok(())
}

/// Read a WAV file as interleaved `f32` samples
fn read_wav(path: &Path) -> Result<(Vec<f32>, hound::WavSpec)> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    let spec = reader.spec();
    tracing::info!(
        "Input format: {} Hz, {} channels, {} bits, {:?}",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );
    if spec.channels == 0 {
        anyhow::bail!("Input file has no channels");
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read float samples")?,
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|sample| f32::from(sample) / f32::from(i16::MAX)))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read 16-bit samples")?,
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|sample| sample as f32 / 8_388_608.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read 24-bit samples")?,
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|sample| sample as f32 / i32::MAX as f32))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read 32-bit samples")?,
            bits => anyhow::bail!("Unsupported bit depth: {bits}"),
        },
    };

    tracing::info!("Read {} frames", samples.len() / usize::from(spec.channels));
    Ok((samples, spec))
}

/// Write interleaved stereo float samples
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: OUTPUT_CHANNELS as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .context("Failed to write sample")?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}
