//! Dispositivo simulado para os testes da thread serial e da sessão.

use crate::recorder::{CsvLayout, ReadingSink, RecorderError, SinkProvider};
use crate::transport::{ConnectError, Connector, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thermo_core::types::{Reading, ServoState};

enum Incoming {
    Line(String),
    Failure,
}

#[derive(Default)]
struct DeviceState {
    incoming: VecDeque<Incoming>,
    written: Vec<Vec<u8>>,
    fail_open: Option<String>,
    reply: Option<(Vec<u8>, String)>,
    opens: usize,
    closes: usize,
    open: bool,
}

/// Estado compartilhado entre o teste e o transporte simulado.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            device: self.clone(),
        })
    }

    pub fn fail_open(&self, reason: &str) {
        self.lock().fail_open = Some(reason.to_string());
    }

    pub fn push_lines(&self, lines: &[&str]) {
        let mut state = self.lock();
        state
            .incoming
            .extend(lines.iter().map(|l| Incoming::Line(l.to_string())));
    }

    /// A próxima leitura depois das linhas já enfileiradas falha com E/S.
    pub fn push_failure(&self) {
        self.lock().incoming.push_back(Incoming::Failure);
    }

    /// Responde `line` sempre que `request` for escrito.
    pub fn reply_to(&self, request: &[u8], line: &str) {
        self.lock().reply = Some((request.to_vec(), line.to_string()));
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }
}

struct MockConnector {
    device: MockDevice,
}

impl Connector for MockConnector {
    fn open(
        &self,
        port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>, ConnectError> {
        let mut state = self.device.lock();
        if let Some(reason) = state.fail_open.clone() {
            return Err(ConnectError::Open {
                port: port.to_string(),
                reason,
            });
        }
        state.opens += 1;
        state.open = true;
        Ok(Box::new(MockTransport {
            device: self.device.clone(),
        }))
    }
}

struct MockTransport {
    device: MockDevice,
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.device.lock();
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.written.push(bytes.to_vec());
        if let Some((request, line)) = state.reply.clone() {
            if request == bytes {
                state.incoming.push_back(Incoming::Line(line));
            }
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let next = self.device.lock().incoming.pop_front();
        match next {
            Some(Incoming::Line(line)) => Ok(Some(line)),
            Some(Incoming::Failure) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "dispositivo removido",
            ))),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        let mut state = self.device.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }
}

// ──────────────────────────────────────────────
// Sink
// ──────────────────────────────────────────────

#[derive(Default)]
struct SinkLog {
    opens: usize,
    closes: usize,
    rows: Vec<(Duration, f64, ServoState)>,
    fail_writes: bool,
    port_open_at_close: Vec<bool>,
}

/// Sink em memória que registra aberturas, fechamentos e linhas.
#[derive(Clone, Default)]
pub struct MockSink {
    log: Arc<Mutex<SinkLog>>,
    device: Option<MockDevice>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink que anota, a cada `close`, se a porta de `device` ainda estava aberta.
    pub fn watching(device: &MockDevice) -> Self {
        Self {
            log: Arc::default(),
            device: Some(device.clone()),
        }
    }

    pub fn port_open_at_close(&self) -> Vec<bool> {
        self.log.lock().unwrap().port_open_at_close.clone()
    }

    pub fn boxed(&self) -> Box<dyn ReadingSink> {
        Box::new(self.clone())
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn values(&self) -> Vec<f64> {
        self.log.lock().unwrap().rows.iter().map(|r| r.1).collect()
    }

    pub fn servo_column(&self) -> Vec<ServoState> {
        self.log.lock().unwrap().rows.iter().map(|r| r.2).collect()
    }

    pub fn fail_writes(&self) {
        self.log.lock().unwrap().fail_writes = true;
    }
}

impl ReadingSink for MockSink {
    fn open(&mut self, _layout: &CsvLayout) -> Result<(), RecorderError> {
        self.log.lock().unwrap().opens += 1;
        Ok(())
    }

    fn write(
        &mut self,
        elapsed: Duration,
        reading: &Reading,
        servo: ServoState,
    ) -> Result<(), RecorderError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_writes {
            return Err(RecorderError::Io(std::io::Error::other("disco cheio")));
        }
        log.rows.push((elapsed, reading.representative().unwrap_or(f64::NAN), servo));
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        let port_open = self.device.as_ref().map(MockDevice::is_open);
        let mut log = self.log.lock().unwrap();
        log.closes += 1;
        log.port_open_at_close.extend(port_open);
        Ok(())
    }

    fn describe(&self) -> String {
        "memória".into()
    }
}

/// Provider que entrega sempre o mesmo [`MockSink`] compartilhado.
pub struct MockProvider {
    pub sink: MockSink,
}

impl SinkProvider for MockProvider {
    fn create(&mut self) -> Result<Box<dyn ReadingSink>, RecorderError> {
        Ok(self.sink.boxed())
    }
}
