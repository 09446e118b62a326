//! Estatísticas de frames matriciais (mínima, máxima, centro, escala de cor).

use crate::types::Reading;

/// Resumo de um frame térmico.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixStats {
    pub min: f64,
    pub max: f64,
    /// Célula central (`rows/2`, `cols/2`)
    pub center: f64,
    /// Limites da escala de cor (percentis 1 e 99)
    pub color_low: f64,
    pub color_high: f64,
}

/// Diferença mínima entre os limites de cor antes de alargar a escala.
const MIN_COLOR_SPAN: f64 = 0.1;
const COLOR_PADDING: f64 = 0.5;

/// Calcula estatísticas de uma leitura matricial. Escalares retornam `None`.
pub fn matrix_stats(reading: &Reading) -> Option<MatrixStats> {
    let Reading::Matrix { .. } = reading else {
        return None;
    };

    let mut values = reading.flatten();
    values.sort_by(f64::total_cmp);

    let min = *values.first()?;
    let max = *values.last()?;

    let (mut color_low, mut color_high) = (percentile(&values, 1.0), percentile(&values, 99.0));
    if color_high - color_low < MIN_COLOR_SPAN {
        color_low -= COLOR_PADDING;
        color_high += COLOR_PADDING;
    }

    Some(MatrixStats {
        min,
        max,
        center: reading.representative()?,
        color_low,
        color_high,
    })
}

/// Percentil com interpolação linear sobre valores já ordenados.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}
