//! # Thermo Core
//!
//! Crate compartilhada com os tipos de leitura, o protocolo de linha serial,
//! a configuração TOML e as análises usadas pelo monitor térmico.
//!
//! ## Módulos
//! - [`types`] – Leituras (escalar/matriz) e estados da sessão
//! - [`protocol`] – Montagem de linhas e decodificação de frames
//! - [`config`] – Configuração unificada via TOML
//! - [`history`] – Janela de histórico para exibição
//! - [`stats`] – Mínima/máxima/centro de frames térmicos
//! - [`dft`] – Espectro de amplitude de um CSV gravado

pub mod types;
pub mod protocol;
pub mod config;
pub mod history;
pub mod stats;
pub mod dft;

// Re-exports convenientes
pub use types::{ConnectionState, CycleState, CycleStep, Reading, RecordingStatus, SensorKind, ServoState};
pub use protocol::{DecodeError, FrameDecoder, LineAssembler, ReadingFormat};
pub use config::AppConfig;
