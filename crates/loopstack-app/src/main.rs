//! loopstack - live looper
//!
//! Interactive entry point: streams the input device through the looper and
//! reads commands from stdin, one per line.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;

use loopstack_app::command::{Command, apply, status_line};
use loopstack_app::{init_tracing, load_settings};
use loopstack_audio::{AudioEngine, LoopEngine, list_input_devices, list_output_devices};

/// Live looper
#[derive(Parser, Debug)]
#[command(name = "loopstack")]
#[command(about = "Record, loop and overdub live audio", long_about = None)]
struct Args {
    /// Engine configuration (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input device name (default device if omitted)
    #[arg(short, long)]
    input: Option<String>,

    /// Output device name (default device if omitted)
    #[arg(short, long)]
    output: Option<String>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the input level continuously
    #[arg(long)]
    meter: bool,

    /// Control loop interval in milliseconds
    #[arg(long, default_value_t = 5)]
    poll_ms: u64,
}

fn main() -> Result<()> {
    init_tracing("loopstack=debug,info");
    let args = Args::parse();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let settings = load_settings(args.config.as_deref())?;
    tracing::info!("Starting loopstack...");

    let mut engine = AudioEngine::new(&settings);
    let input = engine
        .open_input(args.input.as_deref())
        .context("Failed to open input device")?;
    let (mut looper, processor) = LoopEngine::new(settings, input.spec())?;

    if let Some(output) = args.output.as_deref() {
        if !engine.set_output_device(&mut looper, output) {
            anyhow::bail!("Output device not found: {output}");
        }
    }
    engine.start(input, processor)?;

    looper.subscribe(|t| println!("[track {}] {}", t.track, t.to));
    if args.meter {
        looper.set_level_listener(|level| {
            let bar = "#".repeat((level * 40.0).round() as usize);
            eprint!("\r{bar:<40}|");
        });
    }

    let lines = spawn_stdin_reader();
    println!("{}", Command::HELP);

    let interval = Duration::from_millis(args.poll_ms.max(1));
    loop {
        match lines.recv_timeout(interval) {
            Ok(line) => {
                if !handle_line(&line, &mut engine, &mut looper) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        looper.poll();
    }

    tracing::info!("loopstack shutting down");
    engine.stop()?;
    Ok(())
}

/// Returns false when the session should end.
fn handle_line(line: &str, engine: &mut AudioEngine, looper: &mut LoopEngine) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(e) => {
            println!("{e}");
            return true;
        }
    };

    match command {
        Command::Quit => return false,
        Command::Status => println!("{}", status_line(looper)),
        Command::Devices => print_devices(),
        Command::Input(name) => {
            if let Err(e) = engine.switch_input(looper, name.as_deref()) {
                println!("input unchanged: {e}");
            }
        }
        Command::Output(name) => {
            if !engine.set_output_device(looper, &name) {
                println!("output unchanged");
            }
        }
        command => match apply(looper, &command) {
            Ok(true) => {}
            Ok(false) => println!("{command}: not possible while {}", looper.state()),
            Err(e) => println!("{command}: {e:#}"),
        },
    }
    true
}

fn print_devices() {
    println!("inputs:");
    for device in list_input_devices() {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {}", device.name);
    }
    println!("outputs:");
    for device in list_output_devices() {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {}", device.name);
    }
}

fn spawn_stdin_reader() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
