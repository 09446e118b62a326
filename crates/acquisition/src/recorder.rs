//! Gravação das leituras em CSV.
//!
//! A sessão só conhece o trait [`ReadingSink`]; o CSV em disco é a
//! implementação padrão. Um [`SinkProvider`] cria sinks novos quando a
//! sessão precisa gravar sozinha (ciclos automáticos).

use chrono::Local;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thermo_core::config::RecordingConfig;
use thermo_core::protocol::ReadingFormat;
use thermo_core::types::{Reading, ServoState};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Erro de E/S na gravação: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Gravador não foi aberto")]
    NotOpen,

    #[error("Leitura incompatível com o layout do arquivo ({0})")]
    LayoutMismatch(String),
}

/// Colunas do arquivo, fixadas na abertura.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvLayout {
    Scalar,
    Matrix { rows: usize, cols: usize },
}

impl CsvLayout {
    pub fn from_format(format: &ReadingFormat) -> Self {
        match format.shape() {
            None => CsvLayout::Scalar,
            Some((rows, cols)) => CsvLayout::Matrix { rows, cols },
        }
    }

    pub fn header(&self) -> Vec<String> {
        match *self {
            CsvLayout::Scalar => vec![
                "Time (s)".into(),
                "Temperature (°C)".into(),
                "Servo State".into(),
            ],
            CsvLayout::Matrix { rows, cols } => {
                let mut header = Vec::with_capacity(rows * cols + 1);
                header.push("Time (s)".into());
                for r in 0..rows {
                    for c in 0..cols {
                        header.push(format!("p{r}_{c}"));
                    }
                }
                header
            }
        }
    }

    fn row(&self, elapsed: Duration, reading: &Reading, servo: ServoState) -> Result<Vec<String>, RecorderError> {
        let time = format!("{:.2}", elapsed.as_secs_f64());
        match (self, reading) {
            (CsvLayout::Scalar, Reading::Scalar { value, .. }) => {
                Ok(vec![time, format!("{value:.2}"), servo.label().to_string()])
            }
            (CsvLayout::Matrix { rows, cols }, Reading::Matrix { shape, .. })
                if *shape == (*rows, *cols) =>
            {
                let mut row = Vec::with_capacity(rows * cols + 1);
                row.push(time);
                row.extend(reading.flatten().iter().map(|v| format!("{v:.2}")));
                Ok(row)
            }
            _ => Err(RecorderError::LayoutMismatch(format!(
                "{self:?} vs {:?}",
                reading.shape()
            ))),
        }
    }
}

/// Destino das leituras durante uma gravação.
pub trait ReadingSink: Send {
    /// Prepara o destino e escreve o cabeçalho.
    fn open(&mut self, layout: &CsvLayout) -> Result<(), RecorderError>;

    fn write(
        &mut self,
        elapsed: Duration,
        reading: &Reading,
        servo: ServoState,
    ) -> Result<(), RecorderError>;

    /// Descarrega e libera o destino. Chamadas repetidas não fazem nada.
    fn close(&mut self) -> Result<(), RecorderError>;

    /// Descrição para logs (ex: caminho do arquivo).
    fn describe(&self) -> String;
}

type Opener<W> = Box<dyn FnOnce() -> std::io::Result<W> + Send>;

/// Gravador CSV. O destino só é criado em [`ReadingSink::open`].
pub struct CsvRecorder<W: Write + Send> {
    label: String,
    opener: Option<Opener<W>>,
    writer: Option<csv::Writer<W>>,
    layout: Option<CsvLayout>,
    rows: u64,
}

impl CsvRecorder<File> {
    /// Gravador para um arquivo; o arquivo é criado (ou truncado) ao abrir.
    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self::with_opener(label, Box::new(move || File::create(path)))
    }
}

impl<W: Write + Send + 'static> CsvRecorder<W> {
    /// Gravador sobre um writer já existente.
    pub fn from_writer(label: impl Into<String>, writer: W) -> Self {
        Self::with_opener(label.into(), Box::new(move || Ok(writer)))
    }
}

impl<W: Write + Send> CsvRecorder<W> {
    fn with_opener(label: String, opener: Opener<W>) -> Self {
        Self {
            label,
            opener: Some(opener),
            writer: None,
            layout: None,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }
}

impl<W: Write + Send> ReadingSink for CsvRecorder<W> {
    fn open(&mut self, layout: &CsvLayout) -> Result<(), RecorderError> {
        let opener = self.opener.take().ok_or(RecorderError::NotOpen)?;
        let mut writer = csv::Writer::from_writer(opener()?);
        writer.write_record(layout.header())?;
        writer.flush()?;

        info!("Gravação iniciada em {}", self.label);
        self.writer = Some(writer);
        self.layout = Some(*layout);
        Ok(())
    }

    fn write(
        &mut self,
        elapsed: Duration,
        reading: &Reading,
        servo: ServoState,
    ) -> Result<(), RecorderError> {
        let (Some(writer), Some(layout)) = (self.writer.as_mut(), self.layout.as_ref()) else {
            return Err(RecorderError::NotOpen);
        };
        writer.write_record(layout.row(elapsed, reading, servo)?)?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("Gravação encerrada: {} ({} linhas)", self.label, self.rows);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl<W: Write + Send> Drop for CsvRecorder<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ──────────────────────────────────────────────
// Criação automática de arquivos
// ──────────────────────────────────────────────

/// Cria sinks novos sob demanda.
pub trait SinkProvider: Send {
    fn create(&mut self) -> Result<Box<dyn ReadingSink>, RecorderError>;
}

/// Gera `<prefixo><YYYYmmdd_HHMMSS>.csv` no diretório configurado.
#[derive(Debug, Clone)]
pub struct CsvFileProvider {
    directory: PathBuf,
    prefix: String,
}

impl CsvFileProvider {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &RecordingConfig) -> Self {
        Self::new(&config.directory, &config.file_prefix)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Próximo caminho livre (sufixo `_N` se o segundo já foi usado).
    pub fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}{}", self.prefix, stamp);
        let mut path = self.directory.join(format!("{base}.csv"));
        let mut n = 1;
        while path.exists() {
            path = self.directory.join(format!("{base}_{n}.csv"));
            n += 1;
        }
        path
    }
}

impl SinkProvider for CsvFileProvider {
    fn create(&mut self) -> Result<Box<dyn ReadingSink>, RecorderError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.next_path();
        debug!("Novo arquivo de gravação: {}", path.display());
        Ok(Box::new(CsvRecorder::to_path(path)))
    }
}
