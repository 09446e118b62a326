//! Tipos compartilhados entre o decoder, a sessão de aquisição e o logger.
//!
//! Todas as leituras são valores imutáveis: criadas pelo decoder, repassadas
//! pela sessão e descartadas logo depois (exceto o histórico de exibição).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

// ──────────────────────────────────────────────
// Sensor
// ──────────────────────────────────────────────

/// Modelo de sensor ligado ao microcontrolador.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Termopar MAX6675 – um float por linha.
    #[default]
    Max6675,
    /// Câmera térmica AMG8833 – matriz 8×8.
    Amg8833,
    /// Câmera térmica MLX90640 – matriz 24×32.
    Mlx90640,
}

impl SensorKind {
    /// Dimensões (linhas, colunas) de fábrica para sensores matriciais.
    pub fn default_shape(self) -> Option<(usize, usize)> {
        match self {
            SensorKind::Max6675 => None,
            SensorKind::Amg8833 => Some((8, 8)),
            SensorKind::Mlx90640 => Some((24, 32)),
        }
    }

    pub fn is_matrix(self) -> bool {
        self.default_shape().is_some()
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Max6675 => "MAX6675",
            SensorKind::Amg8833 => "AMG8833",
            SensorKind::Mlx90640 => "MLX90640",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────────────────────
// Leituras
// ──────────────────────────────────────────────

/// Uma medição decodificada.
///
/// Invariante de `Matrix`: exatamente `shape.0` linhas, cada uma com
/// exatamente `shape.1` valores. Use [`Reading::matrix`] para construir.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Scalar {
        value: f64,
        timestamp: Instant,
    },
    Matrix {
        rows: Vec<Vec<f64>>,
        shape: (usize, usize),
        timestamp: Instant,
    },
}

impl Reading {
    pub fn scalar(value: f64, timestamp: Instant) -> Self {
        Reading::Scalar { value, timestamp }
    }

    /// Monta uma leitura matricial; retorna `None` se as linhas forem
    /// irregulares ou vazias.
    pub fn matrix(rows: Vec<Vec<f64>>, timestamp: Instant) -> Option<Self> {
        let cols = rows.first()?.len();
        if cols == 0 || rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let shape = (rows.len(), cols);
        Some(Reading::Matrix {
            rows,
            shape,
            timestamp,
        })
    }

    pub fn timestamp(&self) -> Instant {
        match self {
            Reading::Scalar { timestamp, .. } | Reading::Matrix { timestamp, .. } => *timestamp,
        }
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            Reading::Scalar { .. } => None,
            Reading::Matrix { shape, .. } => Some(*shape),
        }
    }

    /// Valor representativo para o histórico: o próprio valor escalar ou a
    /// célula central da matriz. `None` se a matriz não tiver essa célula.
    pub fn representative(&self) -> Option<f64> {
        match self {
            Reading::Scalar { value, .. } => Some(*value),
            Reading::Matrix { rows, shape, .. } => {
                rows.get(shape.0 / 2)?.get(shape.1 / 2).copied()
            }
        }
    }

    /// Valores em ordem row-major (um único elemento para escalares).
    pub fn flatten(&self) -> Vec<f64> {
        match self {
            Reading::Scalar { value, .. } => vec![*value],
            Reading::Matrix { rows, .. } => rows.iter().flatten().copied().collect(),
        }
    }
}

// ──────────────────────────────────────────────
// Estados da sessão
// ──────────────────────────────────────────────

/// Estado da conexão serial. Só a sessão de aquisição o altera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Última posição comandada do servo. Não é verificada no hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServoState {
    Open,
    #[default]
    Closed,
}

impl ServoState {
    /// Rótulo gravado na coluna "Servo State" do CSV.
    pub fn label(self) -> &'static str {
        match self {
            ServoState::Open => "Open",
            ServoState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ServoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Passo corrente do ciclo automático do servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    /// Próxima ação: comandar abertura.
    Open,
    /// Servo aberto, aguardando o intervalo.
    WaitOpen,
    /// Próxima ação: comandar fechamento.
    Close,
    /// Servo fechado, aguardando o intervalo.
    WaitClose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum CycleState {
    #[default]
    Idle,
    RunningCycle {
        current: u32,
        total: u32,
        step: CycleStep,
        interval: Duration,
    },
}

impl CycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, CycleState::RunningCycle { .. })
    }
}

/// Resumo público do estado de gravação (o sink em si pertence à sessão).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordingStatus {
    #[default]
    Idle,
    Recording {
        started_at: Instant,
        deadline: Option<Instant>,
        started_by_cycle: bool,
    },
}

impl RecordingStatus {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingStatus::Recording { .. })
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
