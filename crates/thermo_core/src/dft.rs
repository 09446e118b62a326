//! Análise espectral offline de um CSV gravado.
//!
//! Lê as colunas `Time (s)` e `Temperature (°C)`, assume amostragem
//! uniforme (período = diferença entre os dois primeiros tempos) e calcula
//! o espectro de amplitude unilateral até a frequência de Nyquist.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum DftError {
    #[error("Erro ao ler CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Linha {line}: valor inválido {value:?}")]
    Parse { line: u64, value: String },

    #[error("São necessários ao menos 2 pontos para a DFT (recebidos {0})")]
    TooFewSamples(usize),

    #[error("Período de amostragem inválido: {0} s")]
    InvalidPeriod(f64),
}

/// Série temporal carregada do CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub time: Vec<f64>,
    pub temperature: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.temperature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty()
    }
}

/// Espectro de amplitude unilateral.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Período de amostragem (s)
    pub sample_period: f64,
    /// Frequência de amostragem (Hz)
    pub sample_rate: f64,
    pub frequencies: Vec<f64>,
    /// Amplitude em °C; o bin 0 é o valor médio (DC)
    pub amplitudes: Vec<f64>,
}

impl Spectrum {
    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    /// As `n` componentes mais fortes, excluindo o DC, em ordem decrescente.
    pub fn dominant(&self, n: usize) -> Vec<(f64, f64)> {
        let mut bins: Vec<(f64, f64)> = self
            .frequencies
            .iter()
            .copied()
            .zip(self.amplitudes.iter().copied())
            .skip(1)
            .collect();
        bins.sort_by(|a, b| b.1.total_cmp(&a.1));
        bins.truncate(n);
        bins
    }
}

/// Carrega as duas primeiras colunas de um CSV com cabeçalho.
pub fn load_series(path: &Path) -> Result<Series, DftError> {
    let reader = csv::Reader::from_path(path)?;
    let series = collect_series(reader)?;
    info!("Arquivo carregado: {} ({} pontos)", path.display(), series.len());
    Ok(series)
}

/// Igual a [`load_series`], a partir de qualquer leitor.
pub fn read_series<R: Read>(input: R) -> Result<Series, DftError> {
    collect_series(csv::Reader::from_reader(input))
}

fn collect_series<R: Read>(mut reader: csv::Reader<R>) -> Result<Series, DftError> {
    let mut series = Series::default();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |i: usize| -> Result<f64, DftError> {
            let raw = record.get(i).unwrap_or("").trim();
            raw.parse::<f64>().map_err(|_| DftError::Parse {
                line,
                value: raw.to_string(),
            })
        };
        series.time.push(field(0)?);
        series.temperature.push(field(1)?);
    }
    Ok(series)
}

/// Calcula o espectro de amplitude (equivalente a uma rFFT).
///
/// Amplitudes escaladas por `2/N`, exceto o DC, escalado por `1/N`.
pub fn amplitude_spectrum(series: &Series) -> Result<Spectrum, DftError> {
    let n = series.len();
    if n < 2 || series.time.len() < 2 {
        return Err(DftError::TooFewSamples(n));
    }

    let sample_period = series.time[1] - series.time[0];
    if !(sample_period > 0.0) {
        return Err(DftError::InvalidPeriod(sample_period));
    }
    let sample_rate = 1.0 / sample_period;
    debug!("Ts = {sample_period:.3} s, Fs = {sample_rate:.3} Hz, Nyquist = {:.3} Hz", sample_rate / 2.0);

    let mut buffer: Vec<Complex<f64>> = series
        .temperature
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .collect();
    let fft = FftPlanner::new().plan_fft_forward(n);
    fft.process(&mut buffer);

    let bins = n / 2 + 1;
    let frequencies = (0..bins).map(|k| k as f64 * sample_rate / n as f64).collect();
    let amplitudes = buffer[..bins]
        .iter()
        .enumerate()
        .map(|(k, y)| {
            let scale = if k == 0 { 1.0 } else { 2.0 };
            scale * y.norm() / n as f64
        })
        .collect();

    Ok(Spectrum {
        sample_period,
        sample_rate,
        frequencies,
        amplitudes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_series(n: usize, ts: f64, freq: f64, amp: f64, offset: f64) -> Series {
        let time: Vec<f64> = (0..n).map(|i| i as f64 * ts).collect();
        let temperature = time
            .iter()
            .map(|t| offset + amp * (2.0 * PI * freq * t).sin())
            .collect();
        Series { time, temperature }
    }

    #[test]
    fn sinusoid_peaks_at_its_frequency() {
        // 0.2 s por amostra (taxa de polling padrão), 0.5 Hz, 100 amostras
        let series = sine_series(100, 0.2, 0.5, 3.0, 25.0);
        let spectrum = amplitude_spectrum(&series).unwrap();

        assert!((spectrum.sample_rate - 5.0).abs() < 1e-9);
        assert!((spectrum.nyquist() - 2.5).abs() < 1e-9);
        assert_eq!(spectrum.frequencies.len(), 51);

        let (freq, amp) = spectrum.dominant(1)[0];
        assert!((freq - 0.5).abs() < 1e-9);
        assert!((amp - 3.0).abs() < 1e-6);
        // DC = média
        assert!((spectrum.amplitudes[0] - 25.0).abs() < 1e-6);
    }

    #[test]
    fn needs_two_samples() {
        let series = Series {
            time: vec![0.0],
            temperature: vec![20.0],
        };
        assert!(matches!(amplitude_spectrum(&series), Err(DftError::TooFewSamples(1))));
    }

    #[test]
    fn rejects_non_increasing_time() {
        let series = Series {
            time: vec![1.0, 1.0, 2.0],
            temperature: vec![20.0, 21.0, 22.0],
        };
        assert!(matches!(amplitude_spectrum(&series), Err(DftError::InvalidPeriod(_))));
    }

    #[test]
    fn reads_recorder_csv() {
        let data = "Time (s),Temperature (°C),Servo State\n0.00,21.50,Closed\n0.20,21.75,Open\n";
        let series = read_series(data.as_bytes()).unwrap();
        assert_eq!(series.time, vec![0.0, 0.2]);
        assert_eq!(series.temperature, vec![21.5, 21.75]);
    }

    #[test]
    fn reports_bad_value() {
        let data = "Time (s),Temperature (°C)\n0.0,abc\n";
        assert!(matches!(read_series(data.as_bytes()), Err(DftError::Parse { .. })));
    }
}
