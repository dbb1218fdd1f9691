//! Text commands shared by the interactive CLI and the offline renderer.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use loopstack_audio::builtin::create_builtin;
use loopstack_audio::{LoopEngine, ProcessingMode};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Single-button record toggle
    Record,
    /// Single-button overdub toggle
    Overdub,
    Stop,
    Play,
    Clear,
    Undo,
    Track(usize),
    Mode(ProcessingMode),
    LowLatency(bool),
    Monitor(bool),
    Volume(f32),
    /// Append a built-in module to the chain
    Add(String),
    Remove(usize),
    Bypass(usize, bool),
    Param { index: usize, id: u32, value: f32 },
    Status,
    Devices,
    /// Switch input device; `None` selects the default
    Input(Option<String>),
    Output(String),
    Quit,
}

impl Command {
    /// Help text listing every command
    pub const HELP: &'static str = "\
commands:
  record | overdub | stop | play | clear | undo
  track <n>               select track
  mode <raw|guitar|voice> processing mode
  latency <on|off>        low-latency path
  monitor <on|off>        input monitoring
  volume <0..1>           master volume
  add <drive|amp>         append module
  remove <i>              remove module
  bypass <i> <on|off>
  param <i> <id> <value>
  status | devices
  input [name] | output <name>
  quit";
}

fn parse_switch(word: Option<&str>) -> Result<bool> {
    match word {
        Some("on" | "true" | "1") => Ok(true),
        Some("off" | "false" | "0") => Ok(false),
        Some(other) => bail!("expected on/off, got {other}"),
        None => bail!("expected on/off"),
    }
}

fn parse_arg<T>(word: Option<&str>, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let word = word.ok_or_else(|| anyhow!("missing {what}"))?;
    word.parse().with_context(|| format!("invalid {what}: {word}"))
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            bail!("empty command");
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "record" | "rec" | "r" => Self::Record,
            "overdub" | "dub" | "o" => Self::Overdub,
            "stop" | "s" => Self::Stop,
            "play" | "p" => Self::Play,
            "clear" => Self::Clear,
            "undo" | "u" => Self::Undo,
            "track" | "t" => Self::Track(parse_arg(words.next(), "track")?),
            "mode" => {
                let word = words.next().ok_or_else(|| anyhow!("missing mode"))?;
                Self::Mode(word.parse()?)
            }
            "latency" => Self::LowLatency(parse_switch(words.next())?),
            "monitor" => Self::Monitor(parse_switch(words.next())?),
            "volume" | "vol" => Self::Volume(parse_arg(words.next(), "volume")?),
            "add" => Self::Add(parse_arg(words.next(), "module name")?),
            "remove" => Self::Remove(parse_arg(words.next(), "module index")?),
            "bypass" => {
                let index = parse_arg(words.next(), "module index")?;
                Self::Bypass(index, parse_switch(words.next())?)
            }
            "param" => Self::Param {
                index: parse_arg(words.next(), "module index")?,
                id: parse_arg(words.next(), "parameter id")?,
                value: parse_arg(words.next(), "value")?,
            },
            "status" => Self::Status,
            "devices" => Self::Devices,
            "input" => {
                let rest = words.collect::<Vec<_>>().join(" ");
                Self::Input((!rest.is_empty()).then_some(rest))
            }
            "output" => {
                let rest = words.collect::<Vec<_>>().join(" ");
                if rest.is_empty() {
                    bail!("missing output device name");
                }
                Self::Output(rest)
            }
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command: {other}"),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |b: bool| if b { "on" } else { "off" };
        match self {
            Self::Record => write!(f, "record"),
            Self::Overdub => write!(f, "overdub"),
            Self::Stop => write!(f, "stop"),
            Self::Play => write!(f, "play"),
            Self::Clear => write!(f, "clear"),
            Self::Undo => write!(f, "undo"),
            Self::Track(i) => write!(f, "track {i}"),
            Self::Mode(mode) => write!(f, "mode {mode}"),
            Self::LowLatency(b) => write!(f, "latency {}", on_off(*b)),
            Self::Monitor(b) => write!(f, "monitor {}", on_off(*b)),
            Self::Volume(v) => write!(f, "volume {v}"),
            Self::Add(name) => write!(f, "add {name}"),
            Self::Remove(i) => write!(f, "remove {i}"),
            Self::Bypass(i, b) => write!(f, "bypass {i} {}", on_off(*b)),
            Self::Param { index, id, value } => write!(f, "param {index} {id} {value}"),
            Self::Status => write!(f, "status"),
            Self::Devices => write!(f, "devices"),
            Self::Input(Some(name)) => write!(f, "input {name}"),
            Self::Input(None) => write!(f, "input"),
            Self::Output(name) => write!(f, "output {name}"),
            Self::Quit => write!(f, "quit"),
        }
    }
}

/// Apply a looper command. Returns whether the looper accepted it.
///
/// Device, status and quit commands are not looper commands and are
/// rejected with an error; callers handle them first.
pub fn apply(looper: &mut LoopEngine, command: &Command) -> Result<bool> {
    let accepted = match command {
        Command::Record => looper.record(),
        Command::Overdub => looper.overdub(),
        Command::Stop => looper.stop(),
        Command::Play => looper.play_loop(),
        Command::Clear => looper.clear(),
        Command::Undo => looper.undo(),
        Command::Track(i) => looper.select_track(*i),
        Command::Mode(mode) => {
            looper.set_processing_mode(*mode)?;
            true
        }
        Command::LowLatency(enabled) => {
            looper.set_low_latency_mode(*enabled)?;
            true
        }
        Command::Monitor(enabled) => looper.set_input_monitoring(*enabled),
        Command::Volume(volume) => looper.set_master_volume(*volume),
        Command::Add(name) => {
            let module =
                create_builtin(name).ok_or_else(|| anyhow!("unknown module: {name}"))?;
            looper.add_module(module)?;
            true
        }
        Command::Remove(index) => {
            looper.remove_module(*index)?;
            true
        }
        Command::Bypass(index, bypassed) => {
            looper.set_module_bypass(*index, *bypassed)?;
            true
        }
        Command::Param { index, id, value } => {
            looper.set_module_parameter(*index, *id, *value)?;
            true
        }
        Command::Status
        | Command::Devices
        | Command::Input(_)
        | Command::Output(_)
        | Command::Quit => bail!("{command} is not a looper command"),
    };
    Ok(accepted)
}

/// A command scheduled at a frame of an offline render
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub frame: u64,
    pub command: Command,
}

/// Parse a render script.
///
/// Each line is `<seconds> <command>`; blank lines and `#` comments are
/// skipped. Cues are returned in time order, keeping file order for cues
/// at the same time.
pub fn parse_script(text: &str, sample_rate: u32) -> Result<Vec<Cue>> {
    let mut cues = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let (time, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow!("line {}: expected '<seconds> <command>'", number + 1))?;
        let seconds: f64 = time
            .parse()
            .with_context(|| format!("line {}: invalid time {time}", number + 1))?;
        if seconds < 0.0 {
            bail!("line {}: negative time", number + 1);
        }
        let command = rest
            .parse()
            .with_context(|| format!("line {}", number + 1))?;
        cues.push(Cue {
            frame: (seconds * f64::from(sample_rate)).round() as u64,
            command,
        });
    }
    cues.sort_by_key(|cue| cue.frame);
    Ok(cues)
}

/// One-line summary of the looper
pub fn status_line(looper: &LoopEngine) -> String {
    let track = looper.active_track();
    let length = looper.loop_length(track).map_or_else(
        || "empty".to_string(),
        |frames| format!("{:.2}s", frames as f64 / f64::from(looper.settings().sample_rate)),
    );
    let config = looper.config();
    format!(
        "{} | track {}/{} ({}) | mode {} | low-latency {} | monitor {} | volume {:.2} \
         | modules [{}] | level {:.2}",
        looper.state(),
        track,
        looper.track_count(),
        length,
        config.processing_mode,
        config.low_latency,
        config.monitor_enabled,
        config.master_volume,
        looper.modules().names().join(", "),
        looper.level()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopstack_audio::{EngineConfig, EngineState, InputSpec};

    #[test]
    fn test_parse_commands() {
        assert_eq!("record".parse::<Command>().unwrap(), Command::Record);
        assert_eq!("  t 1 ".parse::<Command>().unwrap(), Command::Track(1));
        assert_eq!(
            "mode voice".parse::<Command>().unwrap(),
            Command::Mode(ProcessingMode::Voice)
        );
        assert_eq!(
            "bypass 0 on".parse::<Command>().unwrap(),
            Command::Bypass(0, true)
        );
        assert_eq!(
            "input USB Audio Device".parse::<Command>().unwrap(),
            Command::Input(Some("USB Audio Device".to_string()))
        );
        assert_eq!("input".parse::<Command>().unwrap(), Command::Input(None));
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("track x".parse::<Command>().is_err());
        assert!("monitor maybe".parse::<Command>().is_err());
        assert!("output".parse::<Command>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for command in [
            Command::LowLatency(false),
            Command::Param {
                index: 1,
                id: 0,
                value: 0.5,
            },
            Command::Mode(ProcessingMode::Guitar),
        ] {
            assert_eq!(command.to_string().parse::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn test_parse_script() {
        let script = "\
# take one
0.5 record
0.0 monitor on
1.0 record   # close

1.0 overdub
";
        let cues = parse_script(script, 48000).unwrap();
        let frames: Vec<_> = cues.iter().map(|c| c.frame).collect();
        assert_eq!(frames, vec![0, 24000, 48000, 48000]);
        assert_eq!(cues[0].command, Command::Monitor(true));
        assert_eq!(cues[3].command, Command::Overdub);

        assert!(parse_script("record", 48000).is_err());
        assert!(parse_script("-1 record", 48000).is_err());
        assert!(parse_script("1 jump", 48000).is_err());
    }

    #[test]
    fn test_apply_drives_looper() {
        let settings = EngineConfig::default();
        let input = InputSpec {
            channels: 2,
            sample_rate: settings.sample_rate,
        };
        let (mut looper, _processor) = LoopEngine::new(settings, input).unwrap();

        assert!(apply(&mut looper, &Command::Record).unwrap());
        assert_eq!(looper.state(), EngineState::Recording);
        assert!(!apply(&mut looper, &Command::Overdub).unwrap());

        assert!(apply(&mut looper, &Command::Add("amp".into())).unwrap());
        assert!(apply(&mut looper, &Command::Add("fuzz".into())).is_err());
        assert!(apply(&mut looper, &Command::Quit).is_err());
        assert!(status_line(&looper).starts_with("recording"));
    }
}
