//! Comandos digitados no console durante o `monitor`.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Conecta (porta opcional; padrão = a do `monitor`)
    Open(Option<String>),
    Close,
    Cycles {
        count: Option<u32>,
        interval: Option<Duration>,
    },
    StopCycles,
    Record {
        path: Option<PathBuf>,
        duration: Option<Duration>,
    },
    StopRecord,
    Servo(ServoCommand),
    Send(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoCommand {
    Open,
    Close,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConsoleError {
    #[error("Comando desconhecido: {0} (digite 'help')")]
    Unknown(String),

    #[error("Argumento inválido para '{command}': {value}")]
    BadArgument { command: &'static str, value: String },

    #[error("'{0}' requer um argumento")]
    MissingArgument(&'static str),
}

pub const HELP: &str = "\
Comandos:
  open [porta]          conecta
  close                 desconecta
  servo open|close      comanda o servo
  cycles [N] [S]        inicia N ciclos com intervalo de S segundos
  stop-cycles           interrompe os ciclos
  record [arquivo] [S]  grava em CSV (S segundos; 0 = sem limite)
  stop-record           encerra a gravação
  send TEXTO            envia texto bruto ao dispositivo
  status                mostra o estado da sessão
  quit                  sai";

/// Interpreta uma linha. Linhas em branco retornam `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim();
    let Some((word, rest)) = split_word(line) else {
        return Ok(None);
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match word.to_ascii_lowercase().as_str() {
        "open" | "connect" => ConsoleCommand::Open(args.first().map(|s| s.to_string())),
        "close" | "disconnect" => ConsoleCommand::Close,
        "servo" => match args.first().map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("open") | Some("o") => ConsoleCommand::Servo(ServoCommand::Open),
            Some("close") | Some("c") => ConsoleCommand::Servo(ServoCommand::Close),
            Some(other) => {
                return Err(ConsoleError::BadArgument {
                    command: "servo",
                    value: other.to_string(),
                });
            }
            None => return Err(ConsoleError::MissingArgument("servo")),
        },
        "cycles" => {
            let count = args
                .first()
                .map(|s| {
                    s.parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| bad("cycles", s))
                })
                .transpose()?;
            let interval = args
                .get(1)
                .map(|s| positive_secs(s).ok_or_else(|| bad("cycles", s)))
                .transpose()?;
            ConsoleCommand::Cycles { count, interval }
        }
        "stop-cycles" => ConsoleCommand::StopCycles,
        "record" => {
            let mut path = None;
            let mut duration = None;
            for arg in &args {
                match arg.parse::<f64>() {
                    Ok(secs) => {
                        duration = Some(Duration::try_from_secs_f64(secs).map_err(|_| bad("record", arg))?)
                    }
                    Err(_) if path.is_none() => path = Some(PathBuf::from(arg)),
                    Err(_) => return Err(bad("record", arg)),
                }
            }
            ConsoleCommand::Record { path, duration }
        }
        "stop-record" => ConsoleCommand::StopRecord,
        "send" => {
            if rest.is_empty() {
                return Err(ConsoleError::MissingArgument("send"));
            }
            ConsoleCommand::Send(rest.to_string())
        }
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        _ => return Err(ConsoleError::Unknown(word.to_string())),
    };
    Ok(Some(command))
}

fn split_word(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    })
}

fn positive_secs(s: &str) -> Option<Duration> {
    let secs: f64 = s.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok().filter(|d| !d.is_zero())
}

fn bad(command: &'static str, value: &str) -> ConsoleError {
    ConsoleError::BadArgument {
        command,
        value: value.to_string(),
    }
}
