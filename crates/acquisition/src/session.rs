//! Sessão de aquisição: máquina de estados da conexão, gravação e ciclos.
//!
//! Roda no lado "foreground": quem controla a sessão chama [`AcquisitionSession::poll`]
//! periodicamente. Toda E/S com o hardware fica na thread serial
//! ([`crate::worker`]); aqui só chegam eventos prontos e saem comandos.

use crate::polling::{PollMode, PollingController};
use crate::recorder::{CsvLayout, ReadingSink, RecorderError, SinkProvider};
use crate::transport::Connector;
use crate::worker::{WorkerConfig, WorkerEvent, WorkerHandle, spawn_worker};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thermo_core::config::AppConfig;
use thermo_core::history::HistoryWindow;
use thermo_core::protocol::ReadingFormat;
use thermo_core::stats::{MatrixStats, matrix_stats};
use thermo_core::types::{
    ConnectionState, CycleState, CycleStep, Reading, RecordingStatus, ServoState,
};
use tracing::{debug, error, info, warn};

/// Parâmetros fixos da sessão, derivados do `AppConfig`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub format: ReadingFormat,
    pub poll_mode: PollMode,
    pub servo_open: Vec<u8>,
    pub servo_close: Vec<u8>,
    pub history_size: usize,
    pub shutdown_grace: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            baud_rate: config.serial.baud_rate,
            read_timeout: config.read_timeout(),
            format: config.sensor.reading_format(),
            poll_mode: PollMode::from_config(config),
            servo_open: config.servo.open_command.as_bytes().to_vec(),
            servo_close: config.servo.close_command.as_bytes().to_vec(),
            history_size: config.display.history_size,
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Evento entregue a quem controla a sessão, em ordem.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Reading(Reading),
    ConnectionChanged(ConnectionState, String),
    Error(String),
}

/// Comando recusado. Nenhuma mudança de estado acontece.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Não conectado")]
    NotConnected,

    #[error("Gravação já em andamento")]
    AlreadyRecording,

    #[error("Nenhuma gravação em andamento")]
    NotRecording,

    #[error("Servo controlado pelo ciclo automático")]
    CycleActive,

    #[error("Argumento inválido: {0}")]
    InvalidArgument(String),

    #[error("Sessão ocupada ({0})")]
    Busy(ConnectionState),

    #[error("Thread serial indisponível; comando descartado")]
    WorkerUnavailable,

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("Falha ao iniciar a thread serial: {0}")]
    Spawn(#[from] std::io::Error),
}

enum RecordingState {
    Idle,
    Recording {
        sink: Box<dyn ReadingSink>,
        started_at: Instant,
        deadline: Option<Instant>,
    },
}

/// O que fazer com uma leitura recebida durante a gravação.
enum RecordOutcome {
    Skip,
    Written,
    DeadlineReached,
    Failed(RecorderError),
}

pub struct AcquisitionSession {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    provider: Option<Box<dyn SinkProvider>>,

    state: ConnectionState,
    port: Option<String>,
    worker: Option<WorkerHandle>,

    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,

    recording: RecordingState,
    logging_started_by_cycle: bool,
    cycle: CycleState,
    cycle_due: Option<Instant>,
    servo: ServoState,

    history: HistoryWindow,
    matrix_stats: Option<MatrixStats>,
}

impl AcquisitionSession {
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        let (events_tx, events_rx) = unbounded();
        let history = HistoryWindow::new(options.history_size);
        Self {
            connector,
            options,
            provider: None,
            state: ConnectionState::Disconnected,
            port: None,
            worker: None,
            events_tx,
            events_rx,
            recording: RecordingState::Idle,
            logging_started_by_cycle: false,
            cycle: CycleState::Idle,
            cycle_due: None,
            servo: ServoState::default(),
            history,
            matrix_stats: None,
        }
    }

    /// Fonte dos arquivos gravados automaticamente pelos ciclos.
    pub fn with_sink_provider(mut self, provider: Box<dyn SinkProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Receptor dos eventos da sessão (pode ser clonado livremente).
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    // ──────────────────────────────────────────────
    // Conexão
    // ──────────────────────────────────────────────

    /// Inicia a conexão. O resultado chega como `ConnectionChanged` em [`Self::poll`].
    pub fn connect(&mut self, port: &str) -> Result<(), SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::Busy(self.state));
        }
        if port.trim().is_empty() {
            return Err(SessionError::InvalidArgument("porta vazia".into()));
        }

        let config = WorkerConfig {
            port: port.to_string(),
            baud_rate: self.options.baud_rate,
            read_timeout: self.options.read_timeout,
            format: self.options.format.clone(),
            polling: PollingController::new(self.options.poll_mode.clone()),
        };
        let worker = spawn_worker(Arc::clone(&self.connector), config)?;

        info!("Conectando a {port}...");
        self.worker = Some(worker);
        self.port = Some(port.to_string());
        self.set_state(ConnectionState::Connecting, format!("Conectando a {port}"));
        Ok(())
    }

    /// Encerra a conexão. Sem efeito se já desconectado.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected && self.worker.is_none() {
            return;
        }
        self.teardown("Desconectado".into());
    }

    /// Processa os eventos pendentes e os timers usando o relógio atual.
    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// Igual a [`Self::poll`], com o instante explícito para prazos e ciclos.
    pub fn poll_at(&mut self, now: Instant) {
        let pending: Vec<WorkerEvent> = match &self.worker {
            Some(worker) => worker.events().try_iter().collect(),
            None => Vec::new(),
        };
        for event in pending {
            self.handle_worker_event(event);
        }

        if self.state != ConnectionState::Connected {
            return;
        }
        let expired = matches!(
            &self.recording,
            RecordingState::Recording { deadline: Some(d), .. } if now >= *d
        );
        if expired {
            info!("Duração da gravação atingida");
            self.stop_recording();
        }
        self.advance_cycle(now);
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Opened { port } => {
                self.history.reset(Instant::now());
                self.matrix_stats = None;
                self.set_state(ConnectionState::Connected, format!("Conectado a {port}"));
            }
            WorkerEvent::OpenFailed(e) => {
                if let Some(mut worker) = self.worker.take() {
                    worker.shutdown(self.options.shutdown_grace);
                }
                self.port = None;
                self.emit(SessionEvent::Error(e.to_string()));
                self.set_state(ConnectionState::Disconnected, e.to_string());
            }
            WorkerEvent::Reading(reading) => self.accept_reading(reading),
            WorkerEvent::Rejected(e) => {
                warn!("Leitura descartada: {e}");
                self.emit(SessionEvent::Error(e.to_string()));
            }
            WorkerEvent::Fault(e) => {
                error!("Conexão perdida: {e}");
                self.emit(SessionEvent::Error(e.to_string()));
                self.teardown(format!("Conexão perdida: {e}"));
            }
            WorkerEvent::Stopped(stats) => {
                debug!(
                    "Thread serial encerrada ({} requisições, {} perdidas)",
                    stats.requests, stats.missed
                );
            }
        }
    }

    fn accept_reading(&mut self, reading: Reading) {
        self.history.push(&reading);
        if let Some(stats) = matrix_stats(&reading) {
            self.matrix_stats = Some(stats);
        }

        let servo = self.servo;
        let outcome = match &mut self.recording {
            RecordingState::Idle => RecordOutcome::Skip,
            RecordingState::Recording {
                sink,
                started_at,
                deadline,
            } => {
                let ts = reading.timestamp();
                if ts < *started_at {
                    // Decodificada antes do início da gravação
                    RecordOutcome::Skip
                } else if deadline.is_some_and(|d| ts >= d) {
                    RecordOutcome::DeadlineReached
                } else {
                    match sink.write(ts.duration_since(*started_at), &reading, servo) {
                        Ok(()) => RecordOutcome::Written,
                        Err(e) => RecordOutcome::Failed(e),
                    }
                }
            }
        };

        match outcome {
            RecordOutcome::Skip | RecordOutcome::Written => {}
            RecordOutcome::DeadlineReached => {
                info!("Duração da gravação atingida");
                self.stop_recording();
            }
            RecordOutcome::Failed(e) => {
                error!("Falha ao gravar leitura: {e}");
                self.emit(SessionEvent::Error(format!("Gravação interrompida: {e}")));
                self.stop_recording();
            }
        }

        self.emit(SessionEvent::Reading(reading));
    }

    /// Sai de `Connected`: gravação e ciclos param antes do transporte fechar.
    fn teardown(&mut self, message: String) {
        self.stop_recording();
        self.stop_cycles();

        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnecting, "Desconectando".into());
        }

        if let Some(mut worker) = self.worker.take() {
            worker.shutdown(self.options.shutdown_grace);
            // Eventos produzidos até a parada ainda são entregues
            for event in worker.events().try_iter() {
                match event {
                    WorkerEvent::Reading(reading) => {
                        self.history.push(&reading);
                        self.emit(SessionEvent::Reading(reading));
                    }
                    WorkerEvent::Rejected(e) => self.emit(SessionEvent::Error(e.to_string())),
                    WorkerEvent::Fault(e) => warn!("Falha durante o encerramento: {e}"),
                    _ => {}
                }
            }
        }

        self.port = None;
        self.set_state(ConnectionState::Disconnected, message);
    }

    // ──────────────────────────────────────────────
    // Gravação
    // ──────────────────────────────────────────────

    /// Começa a gravar. `duration` nula ou zero = sem prazo.
    pub fn start_recording(
        &mut self,
        sink: Box<dyn ReadingSink>,
        duration: Option<Duration>,
    ) -> Result<(), SessionError> {
        self.begin_recording(sink, duration, false)
    }

    fn begin_recording(
        &mut self,
        mut sink: Box<dyn ReadingSink>,
        duration: Option<Duration>,
        by_cycle: bool,
    ) -> Result<(), SessionError> {
        self.require_connected()?;
        if matches!(self.recording, RecordingState::Recording { .. }) {
            return Err(SessionError::AlreadyRecording);
        }

        sink.open(&CsvLayout::from_format(&self.options.format))?;

        let started_at = Instant::now();
        let duration = duration.filter(|d| !d.is_zero());
        match duration {
            Some(d) => info!("Gravando em {} por {d:?}", sink.describe()),
            None => info!("Gravando em {}", sink.describe()),
        }
        let deadline = duration.map(|d| started_at + d);

        self.recording = RecordingState::Recording {
            sink,
            started_at,
            deadline,
        };
        self.logging_started_by_cycle = by_cycle;
        Ok(())
    }

    /// Para a gravação e fecha o sink. Sem efeito se não há gravação.
    pub fn stop_recording(&mut self) {
        let RecordingState::Recording { mut sink, .. } =
            std::mem::replace(&mut self.recording, RecordingState::Idle)
        else {
            return;
        };
        self.logging_started_by_cycle = false;

        if let Err(e) = sink.close() {
            error!("Erro ao fechar {}: {e}", sink.describe());
            self.emit(SessionEvent::Error(format!("Erro ao fechar gravação: {e}")));
        }
    }

    // ──────────────────────────────────────────────
    // Ciclos do servo
    // ──────────────────────────────────────────────

    /// Inicia `total` ciclos abrir/esperar/fechar/esperar. Sem efeito se já rodando.
    pub fn start_cycles(&mut self, total: u32, interval: Duration) -> Result<(), SessionError> {
        self.require_connected()?;
        if total == 0 {
            return Err(SessionError::InvalidArgument("número de ciclos deve ser ≥ 1".into()));
        }
        if interval.is_zero() {
            return Err(SessionError::InvalidArgument("intervalo deve ser > 0".into()));
        }
        if self.cycle.is_running() {
            debug!("Ciclos já em andamento, ignorando");
            return Ok(());
        }

        if matches!(self.recording, RecordingState::Idle) {
            match self.provider.as_mut() {
                Some(provider) => {
                    let sink = provider.create()?;
                    self.begin_recording(sink, None, true)?;
                }
                None => warn!("Sem destino de gravação configurado; ciclos sem gravação"),
            }
        }

        info!("Iniciando {total} ciclos com intervalo de {interval:?}");
        self.cycle = CycleState::RunningCycle {
            current: 0,
            total,
            step: CycleStep::Open,
            interval,
        };
        self.advance_cycle(Instant::now());
        Ok(())
    }

    /// Interrompe os ciclos. Para a gravação apenas se ela foi iniciada pelos ciclos.
    pub fn stop_cycles(&mut self) {
        if self.cycle.is_running() {
            info!("Ciclos interrompidos");
        }
        self.cycle = CycleState::Idle;
        self.cycle_due = None;
        if self.logging_started_by_cycle {
            self.stop_recording();
        }
    }

    fn advance_cycle(&mut self, now: Instant) {
        loop {
            let CycleState::RunningCycle {
                current,
                total,
                step,
                interval,
            } = self.cycle
            else {
                return;
            };

            let next_step = match step {
                CycleStep::Open => {
                    // Falha já reportada como evento; a falha de transporte encerra o ciclo
                    let _ = self.command_servo(ServoState::Open);
                    self.cycle_due = Some(now + interval);
                    CycleStep::WaitOpen
                }
                CycleStep::Close => {
                    let _ = self.command_servo(ServoState::Closed);
                    self.cycle_due = Some(now + interval);
                    CycleStep::WaitClose
                }
                CycleStep::WaitOpen | CycleStep::WaitClose if self.cycle_due.is_some_and(|d| now < d) => {
                    return;
                }
                CycleStep::WaitOpen => CycleStep::Close,
                CycleStep::WaitClose => {
                    let done = current + 1;
                    info!("Ciclo {done}/{total} concluído");
                    if done >= total {
                        info!("Todos os ciclos concluídos");
                        self.stop_cycles();
                        return;
                    }
                    self.cycle = CycleState::RunningCycle {
                        current: done,
                        total,
                        step: CycleStep::Open,
                        interval,
                    };
                    continue;
                }
            };

            self.cycle = CycleState::RunningCycle {
                current,
                total,
                step: next_step,
                interval,
            };
        }
    }

    // ──────────────────────────────────────────────
    // Servo e comandos manuais
    // ──────────────────────────────────────────────

    pub fn open_servo(&mut self) -> Result<(), SessionError> {
        self.manual_servo(ServoState::Open)
    }

    pub fn close_servo(&mut self) -> Result<(), SessionError> {
        self.manual_servo(ServoState::Closed)
    }

    fn manual_servo(&mut self, target: ServoState) -> Result<(), SessionError> {
        self.require_connected()?;
        if self.cycle.is_running() {
            return Err(SessionError::CycleActive);
        }
        self.command_servo(target)
    }

    /// O estado do servo só muda se o comando chegou à thread serial.
    fn command_servo(&mut self, target: ServoState) -> Result<(), SessionError> {
        let bytes = match target {
            ServoState::Open => self.options.servo_open.clone(),
            ServoState::Closed => self.options.servo_close.clone(),
        };
        debug!("Servo → {target}");
        self.forward(bytes)?;
        self.servo = target;
        Ok(())
    }

    /// Envia bytes arbitrários ao dispositivo pelo mesmo caminho de escrita.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.require_connected()?;
        if bytes.is_empty() {
            return Err(SessionError::InvalidArgument("comando vazio".into()));
        }
        self.forward(bytes.to_vec())
    }

    fn forward(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        if self.worker.as_ref().is_some_and(|w| w.send(bytes)) {
            return Ok(());
        }
        let err = SessionError::WorkerUnavailable;
        warn!("{err}");
        self.emit(SessionEvent::Error(err.to_string()));
        Err(err)
    }

    // ──────────────────────────────────────────────
    // Consultas
    // ──────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn recording_state(&self) -> RecordingStatus {
        match &self.recording {
            RecordingState::Idle => RecordingStatus::Idle,
            RecordingState::Recording {
                started_at,
                deadline,
                ..
            } => RecordingStatus::Recording {
                started_at: *started_at,
                deadline: *deadline,
                started_by_cycle: self.logging_started_by_cycle,
            },
        }
    }

    pub fn recording_elapsed(&self) -> Result<Duration, SessionError> {
        match &self.recording {
            RecordingState::Idle => Err(SessionError::NotRecording),
            RecordingState::Recording { started_at, .. } => Ok(started_at.elapsed()),
        }
    }

    pub fn cycle_state(&self) -> CycleState {
        self.cycle
    }

    pub fn servo_state(&self) -> ServoState {
        self.servo
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    pub fn latest_matrix_stats(&self) -> Option<MatrixStats> {
        self.matrix_stats
    }

    // ──────────────────────────────────────────────

    fn require_connected(&self) -> Result<(), SessionError> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    fn set_state(&mut self, state: ConnectionState, message: String) {
        if self.state != state {
            debug!("Conexão: {} → {}", self.state, state);
        }
        self.state = state;
        self.emit(SessionEvent::ConnectionChanged(state, message));
    }

    fn emit(&self, event: SessionEvent) {
        // O receptor vive na própria sessão; o envio só falha se ela for descartada
        let _ = self.events_tx.send(event);
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.teardown("Sessão encerrada".into());
        }
    }
}
