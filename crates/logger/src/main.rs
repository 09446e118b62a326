//! # Thermal Logger
//!
//! Monitor serial sem interface gráfica: lê o sensor de temperatura,
//! comanda o servo (manual ou em ciclos) e grava as leituras em CSV.
//!
//! ## Uso
//! ```bash
//! thermo_logger ports                          # Lista portas seriais
//! thermo_logger monitor /dev/ttyUSB0           # Monitor com console
//! thermo_logger monitor COM3 --record --duration 60
//! thermo_logger monitor COM3 --cycles 5 --interval 2
//! thermo_logger dft temperatura_registro_20240101_120000.csv
//! ```

mod console;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::{ConsoleCommand, HELP, ServoCommand, parse_command};
use crossbeam_channel::{Receiver, TryRecvError, unbounded};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thermo_acquisition::{
    AcquisitionSession, CsvFileProvider, CsvRecorder, SerialConnector, SessionEvent,
    SessionOptions, list_available_ports,
};
use thermo_core::config::AppConfig;
use thermo_core::dft::{amplitude_spectrum, load_series};
use thermo_core::stats::matrix_stats;
use thermo_core::types::{ConnectionState, CycleState, Reading, RecordingStatus};
use tracing::{error, info, warn};

/// Período do loop principal (eventos, prazos e ciclos).
const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "thermo_logger")]
#[command(about = "Monitor serial de temperatura com servo e gravação CSV", long_about = None)]
struct Cli {
    /// Arquivo de configuração (padrão: config.toml ao lado do executável)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lista as portas seriais disponíveis
    Ports,

    /// Conecta ao dispositivo e abre o console de comandos
    Monitor {
        /// Porta serial (padrão: [serial].port do config)
        port: Option<String>,

        /// Começa a gravar assim que conectar (arquivo opcional)
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        record: Option<String>,

        /// Duração da gravação inicial em segundos (0 = sem limite)
        #[arg(long)]
        duration: Option<f64>,

        /// Inicia N ciclos do servo assim que conectar
        #[arg(long)]
        cycles: Option<u32>,

        /// Intervalo entre passos do ciclo em segundos
        #[arg(long)]
        interval: Option<f64>,
    },

    /// Espectro de amplitude de um CSV gravado
    Dft {
        /// CSV com colunas "Time (s)" e "Temperature (°C)"
        csv: PathBuf,

        /// Quantidade de componentes a exibir
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
}

fn main() -> Result<()> {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // ── Carregar config ──
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    match cli.command {
        Commands::Ports => print_ports(),
        Commands::Dft { csv, top } => print_spectrum(&csv, top),
        Commands::Monitor {
            port,
            record,
            duration,
            cycles,
            interval,
        } => {
            let problems = config.validate();
            if !problems.is_empty() {
                for p in &problems {
                    error!("Config: {p}");
                }
                bail!("Configuração inválida em {}", config_path.display());
            }

            let port = port.unwrap_or_else(|| config.serial.port.clone());
            if port.is_empty() {
                bail!("Nenhuma porta informada (use `thermo_logger ports` para listar)");
            }

            let startup = Startup {
                record,
                duration: duration.map(secs).transpose()?,
                cycles,
                interval: interval.map(secs).transpose()?,
            };
            run_monitor(&config, &port, Some(startup))
        }
    }
}

// ──────────────────────────────────────────────
// Subcomandos simples
// ──────────────────────────────────────────────

fn print_ports() -> Result<()> {
    let ports = list_available_ports().context("Falha ao enumerar portas seriais")?;
    if ports.is_empty() {
        println!("Nenhuma porta serial encontrada");
    }
    for p in ports {
        if p.description.is_empty() {
            println!("  {}", p.name);
        } else {
            println!("  {:<20} {}", p.name, p.description);
        }
    }
    Ok(())
}

fn print_spectrum(path: &Path, top: usize) -> Result<()> {
    let series = load_series(path).with_context(|| format!("Falha ao ler {}", path.display()))?;
    let spectrum = amplitude_spectrum(&series)?;

    println!();
    println!("══════════════════════════════════════════════");
    println!("   Espectro de amplitude – {}", path.display());
    println!("══════════════════════════════════════════════");
    println!("  Amostras:  {}", series.len());
    println!("  Ts:        {:.3} s", spectrum.sample_period);
    println!("  Fs:        {:.3} Hz", spectrum.sample_rate);
    println!("  Nyquist:   {:.3} Hz", spectrum.nyquist());
    println!("  DC:        {:.3} °C", spectrum.amplitudes[0]);
    println!("──────────────────────────────────────────────");
    for (freq, amp) in spectrum.dominant(top) {
        println!("  {freq:>10.4} Hz   {amp:>8.4} °C");
    }
    println!();
    Ok(())
}

fn secs(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Tempo inválido: {value} s"))
}

// ──────────────────────────────────────────────
// Monitor
// ──────────────────────────────────────────────

/// Ações aplicadas na primeira vez que a conexão fica pronta.
struct Startup {
    /// `Some("")` = gravar com nome automático
    record: Option<String>,
    duration: Option<Duration>,
    cycles: Option<u32>,
    interval: Option<Duration>,
}

fn run_monitor(config: &AppConfig, port: &str, mut startup: Option<Startup>) -> Result<()> {
    let connector = Arc::new(SerialConnector::new(config.settle_delay()));
    let mut session = AcquisitionSession::new(connector, SessionOptions::from_config(config))
        .with_sink_provider(Box::new(CsvFileProvider::from_config(&config.recording)));
    let events = session.events();
    let console = spawn_console()?;

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🌡  THERMAL LOGGER – MONITOR");
    println!("══════════════════════════════════════════════");
    println!("  Porta:    {port} @ {} baud", config.serial.baud_rate);
    println!("  Sensor:   {}", config.sensor.kind);
    println!("  Gravação: {}", config.recording.directory);
    println!("  Digite 'help' para ver os comandos");
    println!("══════════════════════════════════════════════");
    println!();

    session.connect(port)?;

    loop {
        let tick_start = Instant::now();
        session.poll();

        for event in events.try_iter() {
            report_event(&event);
            if matches!(event, SessionEvent::ConnectionChanged(ConnectionState::Connected, _)) {
                if let Some(actions) = startup.take() {
                    apply_startup(&mut session, config, actions);
                }
            }
        }

        loop {
            let line = match console.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // stdin encerrado: continua até a sessão cair
                    if session.connection_state() == ConnectionState::Disconnected {
                        return Ok(());
                    }
                    break;
                }
            };
            match parse_command(&line) {
                Ok(Some(ConsoleCommand::Quit)) => {
                    session.disconnect();
                    info!("Encerrando");
                    return Ok(());
                }
                Ok(Some(command)) => execute(&mut session, config, port, command),
                Ok(None) => {}
                Err(e) => warn!("{e}"),
            }
        }

        // Dormir pelo tempo restante do tick
        let elapsed = tick_start.elapsed();
        if elapsed < TICK {
            std::thread::sleep(TICK - elapsed);
        }
    }
}

fn apply_startup(session: &mut AcquisitionSession, config: &AppConfig, actions: Startup) {
    if let Some(path) = actions.record {
        let duration = actions
            .duration
            .or_else(|| secs(config.recording.default_duration_secs).ok());
        let path = (!path.is_empty()).then(|| PathBuf::from(path));
        start_recording(session, config, path, duration);
    }
    if actions.cycles.is_some() || actions.interval.is_some() {
        start_cycles(session, config, actions.cycles, actions.interval);
    }
}

fn execute(session: &mut AcquisitionSession, config: &AppConfig, default_port: &str, command: ConsoleCommand) {
    let result = match command {
        ConsoleCommand::Open(port) => session.connect(port.as_deref().unwrap_or(default_port)),
        ConsoleCommand::Close => {
            session.disconnect();
            Ok(())
        }
        ConsoleCommand::Servo(ServoCommand::Open) => session.open_servo(),
        ConsoleCommand::Servo(ServoCommand::Close) => session.close_servo(),
        ConsoleCommand::Cycles { count, interval } => {
            start_cycles(session, config, count, interval);
            Ok(())
        }
        ConsoleCommand::StopCycles => {
            session.stop_cycles();
            Ok(())
        }
        ConsoleCommand::Record { path, duration } => {
            start_recording(session, config, path, duration);
            Ok(())
        }
        ConsoleCommand::StopRecord => {
            session.stop_recording();
            Ok(())
        }
        ConsoleCommand::Send(text) => session.send_raw(text.as_bytes()),
        ConsoleCommand::Status => {
            print_status(session);
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{HELP}");
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
    };

    if let Err(e) = result {
        warn!("{e}");
    }
}

fn start_recording(
    session: &mut AcquisitionSession,
    config: &AppConfig,
    path: Option<PathBuf>,
    duration: Option<Duration>,
) {
    let path = path.unwrap_or_else(|| CsvFileProvider::from_config(&config.recording).next_path());
    if let Err(e) = session.start_recording(Box::new(CsvRecorder::to_path(path)), duration) {
        warn!("Não foi possível iniciar a gravação: {e}");
    }
}

fn start_cycles(
    session: &mut AcquisitionSession,
    config: &AppConfig,
    count: Option<u32>,
    interval: Option<Duration>,
) {
    let count = count.unwrap_or(config.cycles.default_count);
    let interval = match interval {
        Some(i) => i,
        None => match secs(config.cycles.default_interval_secs) {
            Ok(i) => i,
            Err(e) => {
                warn!("{e:#}");
                return;
            }
        },
    };
    if let Err(e) = session.start_cycles(count, interval) {
        warn!("Não foi possível iniciar os ciclos: {e}");
    }
}

fn report_event(event: &SessionEvent) {
    match event {
        SessionEvent::Reading(Reading::Scalar { value, .. }) => info!("🌡 {value:.2} °C"),
        SessionEvent::Reading(reading) => {
            if let Some(stats) = matrix_stats(reading) {
                info!(
                    "🌡 frame {:?} | min {:.1} °C | máx {:.1} °C | centro {:.1} °C",
                    reading.shape().unwrap_or_default(),
                    stats.min,
                    stats.max,
                    stats.center
                );
            }
        }
        SessionEvent::ConnectionChanged(state, message) => info!("[{state}] {message}"),
        SessionEvent::Error(message) => error!("{message}"),
    }
}

fn print_status(session: &AcquisitionSession) {
    println!("──────────────────────────────────────────────");
    println!(
        "  Conexão:  {} {}",
        session.connection_state(),
        session.port().unwrap_or("")
    );
    println!("  Servo:    {}", session.servo_state());
    match session.cycle_state() {
        CycleState::Idle => println!("  Ciclos:   parado"),
        CycleState::RunningCycle {
            current,
            total,
            step,
            interval,
        } => println!("  Ciclos:   {}/{total} ({step:?}, intervalo {interval:?})", current + 1),
    }
    match session.recording_state() {
        RecordingStatus::Idle => println!("  Gravação: parada"),
        RecordingStatus::Recording {
            deadline,
            started_by_cycle,
            ..
        } => {
            let elapsed = session.recording_elapsed().unwrap_or_default();
            let owner = if started_by_cycle { " (ciclos)" } else { "" };
            match deadline {
                Some(d) => println!(
                    "  Gravação: {:.1} s, restam {:.1} s{owner}",
                    elapsed.as_secs_f64(),
                    d.saturating_duration_since(Instant::now()).as_secs_f64()
                ),
                None => println!("  Gravação: {:.1} s{owner}", elapsed.as_secs_f64()),
            }
        }
    }
    if let Some(latest) = session.history().latest().and_then(Reading::representative) {
        println!("  Última:   {latest:.2} °C");
    }
    if let Some(stats) = session.latest_matrix_stats() {
        println!(
            "  Escala:   {:.1} – {:.1} °C",
            stats.color_low, stats.color_high
        );
    }
    println!("──────────────────────────────────────────────");
}

// ──────────────────────────────────────────────
// Console (stdin)
// ──────────────────────────────────────────────

fn spawn_console() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded::<String>();
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim_end().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        })
        .context("Falha ao iniciar a thread do console")?;
    Ok(rx)
}
