//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável; todas as seções usam
//! `#[serde(default)]`, então arquivos parciais funcionam.

use crate::protocol::{
    DEFAULT_END_MARKER, DEFAULT_START_MARKER, REQUEST_TEMPERATURE, ReadingFormat, SERVO_CLOSE,
    SERVO_OPEN,
};
use crate::types::SensorKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros de leitura/escrita do arquivo de configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao ler {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Erro ao parsear {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Porta serial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Porta (ex: "COM3", "/dev/ttyUSB0"); vazio = escolher na linha de comando
    pub port: String,
    pub baud_rate: u32,
    /// Timeout base de leitura (ms)
    pub read_timeout_ms: u64,
    /// Espera após abrir a porta – o Arduino reinicia ao conectar (ms)
    pub settle_delay_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_delay_ms: 2000,
        }
    }
}

/// Sensor ligado ao microcontrolador.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// Override do número de linhas da matriz (0 = padrão do sensor)
    pub rows: usize,
    /// Override do número de colunas da matriz (0 = padrão do sensor)
    pub cols: usize,
    pub start_marker: String,
    pub end_marker: String,
    /// Comando enviado uma vez ao conectar (vazio = nenhum)
    pub wake_command: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Max6675,
            rows: 0,
            cols: 0,
            start_marker: DEFAULT_START_MARKER.into(),
            end_marker: DEFAULT_END_MARKER.into(),
            wake_command: String::new(),
        }
    }
}

impl SensorConfig {
    /// Formato de telemetria resultante (sensor + overrides).
    pub fn reading_format(&self) -> ReadingFormat {
        match self.kind.default_shape() {
            None => ReadingFormat::Scalar,
            Some((rows, cols)) => ReadingFormat::Matrix {
                rows: if self.rows > 0 { self.rows } else { rows },
                cols: if self.cols > 0 { self.cols } else { cols },
                start_marker: self.start_marker.clone(),
                end_marker: self.end_marker.clone(),
            },
        }
    }

    pub fn wake_bytes(&self) -> Option<Vec<u8>> {
        (!self.wake_command.is_empty()).then(|| self.wake_command.as_bytes().to_vec())
    }
}

/// Estratégia de polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingStrategy {
    /// Requisição/resposta para escalares, escuta contínua para matrizes.
    #[default]
    Auto,
    RequestResponse,
    Listen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub mode: PollingStrategy,
    /// Período entre requisições (ms)
    pub interval_ms: u64,
    /// Janela máxima de espera pela resposta (ms)
    pub reply_window_ms: u64,
    pub request_command: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            mode: PollingStrategy::Auto,
            interval_ms: 200,
            reply_window_ms: 150,
            request_command: char::from(REQUEST_TEMPERATURE).to_string(),
        }
    }
}

impl PollingConfig {
    /// Resolve `Auto` conforme o sensor.
    pub fn effective_mode(&self, kind: SensorKind) -> PollingStrategy {
        match self.mode {
            PollingStrategy::Auto if kind.is_matrix() => PollingStrategy::Listen,
            PollingStrategy::Auto => PollingStrategy::RequestResponse,
            other => other,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn reply_window(&self) -> Duration {
        Duration::from_millis(self.reply_window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub open_command: String,
    pub close_command: String,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            open_command: char::from(SERVO_OPEN).to_string(),
            close_command: char::from(SERVO_CLOSE).to_string(),
        }
    }
}

/// Valores padrão do modo de ciclos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub default_count: u32,
    pub default_interval_secs: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            default_count: 5,
            default_interval_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Diretório dos CSVs gerados automaticamente
    pub directory: String,
    pub file_prefix: String,
    /// Duração padrão (s); 0 = sem limite
    pub default_duration_secs: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: ".".into(),
            file_prefix: "temperatura_registro_".into(),
            default_duration_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Pontos mantidos no histórico de exibição
    pub history_size: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tempo máximo de espera pelo encerramento da thread serial (ms)
    pub shutdown_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 2000,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub sensor: SensorConfig,
    pub polling: PollingConfig,
    pub servo: ServoConfig,
    pub cycles: CycleConfig,
    pub recording: RecordingConfig,
    pub display: DisplayConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML; usa o padrão em caso de erro.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match Self::try_load(path) {
                Ok(config) => {
                    info!("Configuração carregada de {}", path.display());
                    return config;
                }
                Err(e) => warn!("{e}"),
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Carrega configuração propagando o erro.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.serial.settle_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.session.shutdown_grace_ms)
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.serial.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }
        if self.polling.interval_ms < 10 || self.polling.interval_ms > 60_000 {
            errors.push(format!(
                "Intervalo de polling inválido: {} ms (10–60000)",
                self.polling.interval_ms
            ));
        }
        if self.polling.reply_window_ms >= self.polling.interval_ms {
            errors.push(format!(
                "Janela de resposta ({} ms) deve ser menor que o intervalo ({} ms)",
                self.polling.reply_window_ms, self.polling.interval_ms
            ));
        }
        if self.polling.request_command.is_empty() {
            errors.push("Comando de requisição vazio".into());
        }
        if self.servo.open_command.is_empty() || self.servo.close_command.is_empty() {
            errors.push("Comandos do servo não podem ser vazios".into());
        }
        if self.sensor.kind.is_matrix() && self.sensor.start_marker == self.sensor.end_marker {
            errors.push("Marcadores de início e fim devem ser diferentes".into());
        }
        if self.cycles.default_count == 0 {
            errors.push("Número padrão de ciclos deve ser ≥ 1".into());
        }
        if !(self.cycles.default_interval_secs > 0.0) {
            errors.push(format!(
                "Intervalo de ciclo inválido: {} s",
                self.cycles.default_interval_secs
            ));
        }
        if self.recording.default_duration_secs < 0.0 {
            errors.push("Duração de gravação não pode ser negativa".into());
        }
        if self.display.history_size == 0 {
            errors.push("Histórico de exibição deve ter ao menos 1 ponto".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.serial.baud_rate, parsed.serial.baud_rate);
        assert_eq!(config.sensor.kind, parsed.sensor.kind);
        assert_eq!(config.polling.mode, parsed.polling.mode);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[sensor]
kind = "amg8833"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.sensor.kind, SensorKind::Amg8833);
        // Outros campos devem ter valor padrão
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.polling.interval_ms, 200);
        assert_eq!(config.sensor.reading_format(), ReadingFormat::matrix(8, 8));
    }

    #[test]
    fn auto_polling_follows_sensor() {
        let polling = PollingConfig::default();
        assert_eq!(
            polling.effective_mode(SensorKind::Max6675),
            PollingStrategy::RequestResponse
        );
        assert_eq!(
            polling.effective_mode(SensorKind::Mlx90640),
            PollingStrategy::Listen
        );
    }

    #[test]
    fn shape_override() {
        let sensor = SensorConfig {
            kind: SensorKind::Mlx90640,
            rows: 12,
            ..Default::default()
        };
        assert_eq!(sensor.reading_format().shape(), Some((12, 32)));
    }

    #[test]
    fn invalid_reply_window_is_reported() {
        let mut config = AppConfig::default();
        config.polling.reply_window_ms = 500;
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.serial.port = "/dev/ttyUSB0".into();
        config.save(&path).unwrap();

        let loaded = AppConfig::try_load(&path).unwrap();
        assert_eq!(loaded.serial.port, "/dev/ttyUSB0");
    }

    #[test]
    fn broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "serial = 3").unwrap();
        assert!(matches!(AppConfig::try_load(&path), Err(ConfigError::Parse { .. })));
        assert_eq!(AppConfig::load(&path).serial.baud_rate, 9600);
    }
}
