//! Janela de histórico para exibição (ring buffer dos N pontos mais recentes).

use crate::types::Reading;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Um ponto do gráfico: segundos desde a origem e valor representativo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub t: f64,
    pub value: f64,
}

/// Histórico limitado com origem de tempo reiniciável.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
    origin: Option<Instant>,
    latest: Option<Reading>,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            origin: None,
            latest: None,
        }
    }

    /// Limpa tudo e fixa a origem do eixo de tempo.
    pub fn reset(&mut self, origin: Instant) {
        self.points.clear();
        self.latest = None;
        self.origin = Some(origin);
    }

    pub fn push(&mut self, reading: &Reading) {
        let ts = reading.timestamp();
        let origin = *self.origin.get_or_insert(ts);
        let t = ts.saturating_duration_since(origin).as_secs_f64();

        match reading.representative() {
            Some(value) => {
                if self.points.len() >= self.capacity {
                    self.points.pop_front();
                }
                self.points.push_back(HistoryPoint { t, value });
            }
            None => debug!("Leitura sem valor central, fora do gráfico"),
        }
        self.latest = Some(reading.clone());
    }

    pub fn points(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    /// Leitura mais recente (útil para o heatmap).
    pub fn latest(&self) -> Option<&Reading> {
        self.latest.as_ref()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
