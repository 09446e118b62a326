//! Thread serial: dona exclusiva do transporte durante uma conexão.
//!
//! Abre a porta, executa o polling, decodifica linhas e envia eventos para
//! a sessão via channel. Comandos (servo, envio manual) chegam pelo mesmo
//! caminho de escrita único, sem escritas intercaladas.

use crate::polling::{PollStats, PollingController};
use crate::transport::{ConnectError, Connector, Transport, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thermo_core::protocol::{DecodeError, FrameDecoder, ReadingFormat};
use thermo_core::types::Reading;
use tracing::{debug, error, info, trace, warn};

/// Intervalo de verificação do stop enquanto a thread espera após uma falha.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Comando enviado do controlador para a thread serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Write(Vec<u8>),
}

/// Mensagem enviada da thread serial para a sessão.
#[derive(Debug)]
pub enum WorkerEvent {
    Opened { port: String },
    OpenFailed(ConnectError),
    Reading(Reading),
    Rejected(DecodeError),
    /// Falha de transporte. A porta só é fechada após o pedido de parada.
    Fault(TransportError),
    Stopped(PollStats),
}

/// Parâmetros de uma conexão.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub format: ReadingFormat,
    pub polling: PollingController,
}

/// Handle da thread serial em execução.
pub struct WorkerHandle {
    commands: Sender<WorkerCommand>,
    events: Receiver<WorkerEvent>,
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

/// Inicia a thread serial. A porta é aberta dentro da thread.
pub fn spawn_worker(
    connector: Arc<dyn Connector>,
    config: WorkerConfig,
) -> std::io::Result<WorkerHandle> {
    let (cmd_tx, cmd_rx) = unbounded::<WorkerCommand>();
    // Sem limite: nenhuma leitura é descartada do lado do envio
    let (event_tx, event_rx) = unbounded::<WorkerEvent>();
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let thread = std::thread::Builder::new()
        .name("serial-worker".into())
        .spawn(move || {
            worker_main(connector.as_ref(), config, &cmd_rx, &event_tx, &stop_flag);
            let _ = done_tx.send(());
        })?;

    Ok(WorkerHandle {
        commands: cmd_tx,
        events: event_rx,
        stop,
        done: done_rx,
        thread: Some(thread),
    })
}

impl WorkerHandle {
    /// Encaminha bytes para o dispositivo. `false` se a thread já terminou.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.commands.send(WorkerCommand::Write(bytes)).is_ok()
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    /// Sinaliza parada e espera a thread por até `grace`.
    ///
    /// Retorna `true` se a thread terminou e foi unida. Eventos ainda no
    /// channel continuam disponíveis em [`WorkerHandle::events`].
    pub fn shutdown(&mut self, grace: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return true;
        };

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("Thread serial terminou com panic");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Thread serial não encerrou em {grace:?}, abandonando");
                false
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn worker_main(
    connector: &dyn Connector,
    config: WorkerConfig,
    commands: &Receiver<WorkerCommand>,
    events: &Sender<WorkerEvent>,
    stop: &AtomicBool,
) {
    let WorkerConfig {
        port,
        baud_rate,
        read_timeout,
        format,
        mut polling,
    } = config;

    let mut transport = match connector.open(&port, baud_rate, read_timeout) {
        Ok(t) => t,
        Err(e) => {
            error!("Falha ao conectar: {e}");
            let _ = events.send(WorkerEvent::OpenFailed(e));
            return;
        }
    };

    info!("Thread serial ativa em {port}");
    if events.send(WorkerEvent::Opened { port: port.clone() }).is_err() {
        transport.close();
        return;
    }

    // Decoder novo a cada conexão: nenhum frame parcial vaza entre sessões
    let mut decoder = FrameDecoder::new(format);
    let result = pump(
        transport.as_mut(),
        &mut decoder,
        &mut polling,
        commands,
        events,
        stop,
    );

    if let Err(e) = result {
        error!("Erro de comunicação serial em {port}: {e}");
        let _ = events.send(WorkerEvent::Fault(e));
        // A sessão fecha a gravação antes de pedir a parada
        wait_for_stop(commands, stop);
        transport.close();
    } else {
        // Comandos enfileirados antes do stop ainda são escritos
        if let Err(e) = drain_commands(transport.as_mut(), commands) {
            warn!("Falha ao enviar comandos pendentes: {e}");
        }
        transport.close();
    }

    let stats = polling.stats();
    debug!(
        "Polling: {} requisições, {} respostas, {} perdidas",
        stats.requests, stats.replies, stats.missed
    );
    let _ = events.send(WorkerEvent::Stopped(stats));
}

/// Loop principal. Retorna `Ok` na parada cooperativa, `Err` em falha de E/S.
fn pump(
    transport: &mut dyn Transport,
    decoder: &mut FrameDecoder,
    polling: &mut PollingController,
    commands: &Receiver<WorkerCommand>,
    events: &Sender<WorkerEvent>,
    stop: &AtomicBool,
) -> Result<(), TransportError> {
    if let Some(wake) = polling.on_connect(Instant::now()) {
        debug!("Enviando wake-up ({} bytes)", wake.len());
        transport.write(&wake)?;
    }

    loop {
        drain_commands(transport, commands)?;
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Some(request) = polling.poll_request(Instant::now()) {
            transport.write(&request)?;
        }

        let Some(line) = transport.read_line(polling.read_timeout(Instant::now()))? else {
            continue;
        };
        if line.is_empty() {
            trace!("Linha vazia ignorada");
            continue;
        }

        polling.on_line();
        let event = match decoder.feed_line(&line, Instant::now()) {
            Ok(Some(reading)) => WorkerEvent::Reading(reading),
            Ok(None) => continue,
            Err(e) => {
                debug!("Linha rejeitada: {e}");
                WorkerEvent::Rejected(e)
            }
        };
        if events.send(event).is_err() {
            // Sessão descartada; encerra como parada normal
            return Ok(());
        }
    }
}

/// Bloqueia até o stop (ou o handle ser descartado), descartando comandos.
fn wait_for_stop(commands: &Receiver<WorkerCommand>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match commands.recv_timeout(STOP_POLL) {
            Ok(WorkerCommand::Write(bytes)) => {
                debug!("Comando descartado após falha ({} bytes)", bytes.len());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn drain_commands(
    transport: &mut dyn Transport,
    commands: &Receiver<WorkerCommand>,
) -> Result<(), TransportError> {
    while let Ok(command) = commands.try_recv() {
        match command {
            WorkerCommand::Write(bytes) => {
                trace!("→ {:?}", String::from_utf8_lossy(&bytes));
                transport.write(&bytes)?;
            }
        }
    }
    Ok(())
}
