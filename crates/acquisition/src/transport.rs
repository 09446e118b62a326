//! Transporte serial – único ponto que faz E/S bloqueante com o hardware.
//!
//! [`Connector`] abre a conexão; o [`Transport`] resultante pertence à
//! thread serial durante toda a conexão.

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use thermo_core::protocol::LineAssembler;
use tracing::{debug, info};

/// Falha ao abrir a porta. Reportada, nunca repetida automaticamente.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Não foi possível abrir {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Porta {port} não ficou pronta: {reason}")]
    NotReady { port: String, reason: String },
}

/// Falha de E/S no meio da sessão. Fatal para a conexão.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Erro de E/S serial: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro serial: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Porta já fechada")]
    Closed,
}

/// Conexão aberta com o dispositivo.
pub trait Transport: Send {
    /// Escrita única, best-effort.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Lê uma linha completa. `Ok(None)` se nada chegou dentro do timeout.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Libera o handle. Pode ser chamado várias vezes.
    fn close(&mut self);
}

/// Fábrica de conexões (serial real ou simulada nos testes).
pub trait Connector: Send + Sync {
    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, ConnectError>;
}

// ──────────────────────────────────────────────
// Serial real
// ──────────────────────────────────────────────

/// Abre portas com o crate `serialport`.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Espera após abrir (o Arduino reinicia quando o DTR sobe)
    settle_delay: Duration,
}

impl SerialConnector {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }
}

impl Connector for SerialConnector {
    fn open(
        &self,
        port_name: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, ConnectError> {
        let mut port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| ConnectError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        if !self.settle_delay.is_zero() {
            debug!("Aguardando {:?} para o dispositivo reiniciar", self.settle_delay);
            std::thread::sleep(self.settle_delay);
        }

        let not_ready = |e: serialport::Error| ConnectError::NotReady {
            port: port_name.to_string(),
            reason: e.to_string(),
        };
        // Descarta o lixo do boot do firmware
        port.bytes_to_read().map_err(not_ready)?;
        port.clear(ClearBuffer::Input).map_err(not_ready)?;

        info!("Porta {port_name} aberta @ {baud_rate} baud");
        Ok(Box::new(SerialTransport::new(port_name, port)))
    }
}

/// Transporte sobre uma `SerialPort` com montagem de linhas.
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    lines: LineAssembler,
}

impl SerialTransport {
    pub fn new(name: &str, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.to_string(),
            port: Some(port),
            lines: LineAssembler::default(),
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }

        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            port.set_timeout(remaining)?;

            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    self.lines.push(&chunk[..n]);
                    if let Some(line) = self.lines.next_line() {
                        return Ok(Some(line));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            self.lines.clear();
            info!("Porta {} fechada", self.name);
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// ──────────────────────────────────────────────
// Enumeração
// ──────────────────────────────────────────────

/// Porta serial disponível no sistema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub description: String,
}

/// Lista as portas seriais disponíveis.
pub fn list_available_ports() -> Result<Vec<PortSummary>, serialport::Error> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match &p.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.clone().unwrap_or_default()
                )
                .trim_end()
                .to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".into(),
                SerialPortType::PciPort => "PCI".into(),
                SerialPortType::Unknown => String::new(),
            };
            PortSummary {
                name: p.port_name,
                description,
            }
        })
        .collect())
}
