//! # Thermo Acquisition
//!
//! Sessão de aquisição serial: conexão com o microcontrolador, polling,
//! gravação em CSV e ciclos automáticos do servo.
//!
//! ## Módulos
//! - [`transport`] – Abertura da porta e leitura de linhas
//! - [`polling`] – Cadência requisição/resposta ou escuta contínua
//! - [`worker`] – Thread serial dona do transporte
//! - [`recorder`] – Gravação CSV e nomes automáticos de arquivo
//! - [`session`] – Máquina de estados controlada pelo foreground

pub mod transport;
pub mod polling;
pub mod worker;
pub mod recorder;
pub mod session;

#[cfg(test)]
mod mock;

pub use recorder::{CsvFileProvider, CsvLayout, CsvRecorder, ReadingSink, RecorderError, SinkProvider};
pub use session::{AcquisitionSession, SessionError, SessionEvent, SessionOptions};
pub use transport::{Connector, SerialConnector, Transport, list_available_ports};
