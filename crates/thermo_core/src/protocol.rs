//! Protocolo de linha do microcontrolador.
//!
//! Duas variantes, escolhidas pelo modelo do sensor na conexão:
//!
//! ```text
//! Escalar (MAX6675)           Matricial (AMG8833 / MLX90640)
//! host → 'T'                  device → START
//! device → 23.45\n            device → 22.1,22.3,...,23.0   (C valores)
//!   ou   → Temp:23.45C\n      ...                            (R linhas)
//!                             device → END
//! ```
//!
//! - Servo: host envia `'O'` (abrir) ou `'C'` (fechar), sem confirmação.
//! - Linhas fora de um bloco `START`/`END` são ignoradas (chatter do firmware).
//! - [`LineAssembler`] transforma chunks de bytes em linhas completas;
//!   [`FrameDecoder`] transforma linhas em [`Reading`].

use crate::types::Reading;
use std::time::Instant;
use tracing::{trace, warn};

/// Comando de requisição de temperatura (variante escalar).
pub const REQUEST_TEMPERATURE: u8 = b'T';
/// Comando de abertura do servo.
pub const SERVO_OPEN: u8 = b'O';
/// Comando de fechamento do servo.
pub const SERVO_CLOSE: u8 = b'C';

pub const DEFAULT_START_MARKER: &str = "START";
pub const DEFAULT_END_MARKER: &str = "END";

/// Formato legado do firmware: `Temp:<float>C`.
const LEGACY_PREFIX: &str = "Temp:";
const LEGACY_SUFFIX: char = 'C';

/// Marcador usado pelo firmware para reportar falhas do sensor.
const DEVICE_ERROR_TAG: &str = "Error";

/// Tamanho máximo de uma linha antes de ser descartada.
pub const MAX_LINE_LEN: usize = 4096;

/// Erros de decodificação. Cada um descarta uma única leitura; a sessão
/// continua.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Leitura inválida: {0:?}")]
    InvalidReading(String),

    #[error("Frame com formato inválido: {got_rows} linhas (esperado {expected_rows})")]
    FrameShape { expected_rows: usize, got_rows: usize },

    #[error("Frame com formato inválido: linha {row} tem {got_cols} colunas (esperado {expected_cols})")]
    RowShape {
        row: usize,
        expected_cols: usize,
        got_cols: usize,
    },

    #[error("Frame com formato inválido: célula ({row}, {col}) não numérica: {value:?}")]
    CellShape { row: usize, col: usize, value: String },

    #[error("Dispositivo reportou: {0}")]
    DeviceReported(String),
}

impl DecodeError {
    /// `true` para os erros de forma do frame (linhas, colunas ou células).
    pub fn is_frame_shape(&self) -> bool {
        matches!(
            self,
            DecodeError::FrameShape { .. }
                | DecodeError::RowShape { .. }
                | DecodeError::CellShape { .. }
        )
    }
}

// ──────────────────────────────────────────────
// Formato
// ──────────────────────────────────────────────

/// Formato de telemetria esperado na conexão atual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingFormat {
    Scalar,
    Matrix {
        rows: usize,
        cols: usize,
        start_marker: String,
        end_marker: String,
    },
}

impl ReadingFormat {
    /// Matriz com os marcadores padrão `START` / `END`.
    pub fn matrix(rows: usize, cols: usize) -> Self {
        ReadingFormat::Matrix {
            rows,
            cols,
            start_marker: DEFAULT_START_MARKER.into(),
            end_marker: DEFAULT_END_MARKER.into(),
        }
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            ReadingFormat::Scalar => None,
            ReadingFormat::Matrix { rows, cols, .. } => Some((*rows, *cols)),
        }
    }
}

// ──────────────────────────────────────────────
// Decoder
// ──────────────────────────────────────────────

/// Converte linhas de texto em leituras.
///
/// Só guarda estado entre linhas enquanto um bloco matricial está aberto;
/// [`FrameDecoder::reset`] descarta esse estado (ex: ao reconectar).
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    format: ReadingFormat,
    block: Option<MatrixBlock>,
}

#[derive(Debug, Clone, Default)]
struct MatrixBlock {
    rows: Vec<String>,
    /// Linhas vistas no bloco, inclusive as excedentes não armazenadas.
    seen: usize,
}

impl FrameDecoder {
    pub fn new(format: ReadingFormat) -> Self {
        Self {
            format,
            block: None,
        }
    }

    pub fn format(&self) -> &ReadingFormat {
        &self.format
    }

    /// `true` se existe um bloco `START` aberto aguardando `END`.
    pub fn in_frame(&self) -> bool {
        self.block.is_some()
    }

    pub fn reset(&mut self) {
        self.block = None;
    }

    /// Processa uma linha.
    ///
    /// - `Ok(Some(_))`: leitura completa.
    /// - `Ok(None)`: linha consumida sem produzir leitura (dentro ou fora de bloco).
    /// - `Err(_)`: leitura descartada.
    pub fn feed_line(&mut self, line: &str, now: Instant) -> Result<Option<Reading>, DecodeError> {
        match &self.format {
            ReadingFormat::Scalar => parse_scalar(line).map(|v| Some(Reading::scalar(v, now))),
            ReadingFormat::Matrix {
                rows,
                cols,
                start_marker,
                end_marker,
            } => {
                let (rows, cols) = (*rows, *cols);
                let text = line.trim();

                if text == start_marker {
                    if self.block.is_some() {
                        trace!("START dentro de bloco aberto, reiniciando buffer");
                    }
                    self.block = Some(MatrixBlock::default());
                    return Ok(None);
                }

                if text == end_marker {
                    let Some(block) = self.block.take() else {
                        trace!("END sem START, ignorado");
                        return Ok(None);
                    };
                    return assemble_matrix(block, rows, cols, now).map(Some);
                }

                match self.block.as_mut() {
                    Some(block) => {
                        block.seen += 1;
                        // Guarda no máximo R linhas; o excesso só é contado
                        if block.rows.len() < rows {
                            block.rows.push(text.to_string());
                        }
                    }
                    None => trace!("Linha fora de bloco ignorada: {text:?}"),
                }
                Ok(None)
            }
        }
    }
}

/// Interpreta uma linha escalar: float puro ou `Temp:<float>C`.
pub fn parse_scalar(line: &str) -> Result<f64, DecodeError> {
    let text = line.trim();

    if text.contains(DEVICE_ERROR_TAG) {
        return Err(DecodeError::DeviceReported(text.to_string()));
    }

    let body = match text.strip_prefix(LEGACY_PREFIX) {
        Some(rest) => rest.trim().trim_end_matches(LEGACY_SUFFIX).trim(),
        None => text,
    };

    match body.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::InvalidReading(line.to_string())),
    }
}

fn assemble_matrix(
    block: MatrixBlock,
    rows: usize,
    cols: usize,
    now: Instant,
) -> Result<Reading, DecodeError> {
    if block.seen != rows {
        return Err(DecodeError::FrameShape {
            expected_rows: rows,
            got_rows: block.seen,
        });
    }

    let mut parsed = Vec::with_capacity(rows);
    for (row, raw) in block.rows.iter().enumerate() {
        let mut fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        // Firmware costuma terminar a linha com vírgula
        if fields.len() > 1 && fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }
        if fields.len() != cols {
            return Err(DecodeError::RowShape {
                row,
                expected_cols: cols,
                got_cols: fields.len(),
            });
        }
        let mut values = Vec::with_capacity(cols);
        for (col, field) in fields.iter().enumerate() {
            let value = field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DecodeError::CellShape {
                    row,
                    col,
                    value: field.to_string(),
                })?;
            values.push(value);
        }
        parsed.push(values);
    }

    Reading::matrix(parsed, now).ok_or(DecodeError::FrameShape {
        expected_rows: rows,
        got_rows: 0,
    })
}

// ──────────────────────────────────────────────
// Montagem de linhas
// ──────────────────────────────────────────────

/// Acumula chunks de bytes e entrega linhas completas (`\n` ou `\r\n`).
///
/// A linha parcial final fica retida até o próximo chunk. Uma linha que
/// passe de `max_len` bytes sem terminador é descartada até o próximo `\n`.
#[derive(Debug)]
pub struct LineAssembler {
    buf: Vec<u8>,
    max_len: usize,
    discarding: bool,
    dropped: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(MAX_LINE_LEN)
    }
}

impl LineAssembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            max_len,
            discarding: false,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);

        if self.discarding {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.buf.drain(..=pos);
                    self.discarding = false;
                }
                None => {
                    self.buf.clear();
                    return;
                }
            }
        }

        if !self.buf.contains(&b'\n') && self.buf.len() > self.max_len {
            warn!(
                "Linha serial excedeu {} bytes sem terminador, descartando",
                self.max_len
            );
            self.buf.clear();
            self.discarding = true;
            self.dropped += 1;
        }
    }

    /// Retira a próxima linha completa, sem terminador e sem espaços nas pontas.
    ///
    /// Linhas completas maiores que o limite também são descartadas aqui,
    /// mesmo quando o terminador chegou no mesmo bloco.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let body = raw.strip_suffix(b"\n").unwrap_or(&raw);
            let body = body.strip_suffix(b"\r").unwrap_or(body);
            if body.len() > self.max_len {
                warn!(
                    "Linha serial com {} bytes excede o limite de {}, descartando",
                    body.len(),
                    self.max_len
                );
                self.dropped += 1;
                continue;
            }
            return Some(String::from_utf8_lossy(body).trim().to_string());
        }
    }

    /// Descarta bytes pendentes (ex: após reconectar).
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Quantidade de linhas descartadas por excesso de tamanho.
    pub fn dropped_lines(&self) -> usize {
        self.dropped
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row_of(cols: usize, value: f64) -> String {
        vec![format!("{value:.2}"); cols].join(",")
    }

    fn feed_all(dec: &mut FrameDecoder, lines: &[String]) -> Vec<Result<Option<Reading>, DecodeError>> {
        let now = Instant::now();
        lines.iter().map(|l| dec.feed_line(l, now)).collect()
    }

    #[test]
    fn scalar_bare_and_legacy() {
        let mut dec = FrameDecoder::new(ReadingFormat::Scalar);
        let now = Instant::now();
        let bare = dec.feed_line("23.45", now).unwrap().unwrap();
        let legacy = dec.feed_line("Temp:23.45C", now).unwrap().unwrap();
        assert_eq!(bare, Reading::scalar(23.45, now));
        assert_eq!(legacy, Reading::scalar(23.45, now));
        assert_eq!(parse_scalar("  Temp: 19.5 C \r").unwrap(), 19.5);
    }

    #[test]
    fn scalar_rejects_garbage() {
        let mut dec = FrameDecoder::new(ReadingFormat::Scalar);
        let now = Instant::now();
        assert_eq!(
            dec.feed_line("abc", now),
            Err(DecodeError::InvalidReading("abc".into()))
        );
        assert_eq!(dec.feed_line("", now), Err(DecodeError::InvalidReading(String::new())));
        assert!(matches!(dec.feed_line("nan", now), Err(DecodeError::InvalidReading(_))));
        assert!(!dec.in_frame());
        // Continua funcionando depois da rejeição
        assert!(dec.feed_line("21.0", now).unwrap().is_some());
    }

    #[test]
    fn scalar_device_error_is_reported() {
        assert!(matches!(
            parse_scalar("Error: thermocouple open"),
            Err(DecodeError::DeviceReported(_))
        ));
    }

    #[test]
    fn matrix_8x8_frame() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(8, 8));
        let mut lines = vec!["START".to_string()];
        lines.extend((0..8).map(|i| row_of(8, 20.0 + i as f64)));
        lines.push("END".into());

        let results = feed_all(&mut dec, &lines);
        let readings: Vec<Reading> = results.into_iter().filter_map(|r| r.unwrap()).collect();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].shape(), Some((8, 8)));
        assert!(!dec.in_frame());
    }

    #[test]
    fn matrix_short_frame_then_recovers() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(8, 8));
        let mut lines = vec!["START".to_string()];
        lines.extend((0..7).map(|_| row_of(8, 21.0)));
        lines.push("END".into());
        let results = feed_all(&mut dec, &lines);
        assert_eq!(
            results.last().unwrap(),
            &Err(DecodeError::FrameShape {
                expected_rows: 8,
                got_rows: 7
            })
        );
        assert!(!dec.in_frame());

        let mut good = vec!["START".to_string()];
        good.extend((0..8).map(|_| row_of(8, 22.0)));
        good.push("END".into());
        let results = feed_all(&mut dec, &good);
        assert!(matches!(results.last(), Some(Ok(Some(Reading::Matrix { .. })))));
    }

    #[test]
    fn matrix_row_with_wrong_width() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(2, 3));
        let lines: Vec<String> = ["START", "1,2,3", "4,5", "END"].iter().map(|s| s.to_string()).collect();
        let err = feed_all(&mut dec, &lines).pop().unwrap().unwrap_err();
        assert!(err.is_frame_shape());
        assert_eq!(
            err,
            DecodeError::RowShape {
                row: 1,
                expected_cols: 3,
                got_cols: 2
            }
        );
    }

    #[test]
    fn matrix_too_many_rows_reports_real_count() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(2, 2));
        let lines: Vec<String> = ["START", "1,2", "3,4", "5,6", "END"].iter().map(|s| s.to_string()).collect();
        let last = feed_all(&mut dec, &lines).pop().unwrap();
        assert_eq!(
            last,
            Err(DecodeError::FrameShape {
                expected_rows: 2,
                got_rows: 3
            })
        );
    }

    #[test]
    fn matrix_restart_marker_resets_block() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(2, 2));
        let lines: Vec<String> = ["START", "9,9", "START", "1,2", "3,4,", "END"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let last = feed_all(&mut dec, &lines).pop().unwrap().unwrap().unwrap();
        assert_eq!(last.flatten(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn matrix_ignores_chatter_outside_block() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(1, 2));
        let lines: Vec<String> = ["AMG8833 ready", "END", "1,2"].iter().map(|s| s.to_string()).collect();
        assert!(feed_all(&mut dec, &lines).into_iter().all(|r| r == Ok(None)));
    }

    #[test]
    fn matrix_bad_cell_is_frame_shape_error() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(1, 2));
        let lines: Vec<String> = ["START", "1,x", "END"].iter().map(|s| s.to_string()).collect();
        let err = feed_all(&mut dec, &lines).pop().unwrap().unwrap_err();
        assert!(err.is_frame_shape());
        assert_eq!(
            err,
            DecodeError::CellShape {
                row: 0,
                col: 1,
                value: "x".into()
            }
        );
        assert!(!dec.in_frame());
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut dec = FrameDecoder::new(ReadingFormat::matrix(1, 1));
        let now = Instant::now();
        dec.feed_line("START", now).unwrap();
        assert!(dec.in_frame());
        dec.reset();
        assert!(!dec.in_frame());
        // "5" fora de bloco é ignorado, END sem START também
        assert_eq!(dec.feed_line("5", now), Ok(None));
        assert_eq!(dec.feed_line("END", now), Ok(None));
    }

    #[test]
    fn assembler_handles_chunks_and_crlf() {
        let mut asm = LineAssembler::default();
        asm.push(b"23.");
        assert_eq!(asm.next_line(), None);
        asm.push(b"45\r\nTemp:2");
        assert_eq!(asm.next_line().as_deref(), Some("23.45"));
        assert_eq!(asm.next_line(), None);
        asm.push(b"1.0C\n\n");
        assert_eq!(asm.next_line().as_deref(), Some("Temp:21.0C"));
        assert_eq!(asm.next_line().as_deref(), Some(""));
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn assembler_drops_overlong_line() {
        let mut asm = LineAssembler::new(8);
        asm.push(b"0123456789");
        assert_eq!(asm.pending(), 0);
        asm.push(b"abc\n42\n");
        assert_eq!(asm.next_line().as_deref(), Some("42"));
        assert_eq!(asm.dropped_lines(), 1);
    }

    #[test]
    fn assembler_drops_overlong_line_with_terminator_in_same_chunk() {
        let mut asm = LineAssembler::new(8);
        asm.push(b"0123456789012345\n42\r\n");
        assert_eq!(asm.next_line().as_deref(), Some("42"));
        assert_eq!(asm.dropped_lines(), 1);
        assert_eq!(asm.next_line(), None);
    }
}
