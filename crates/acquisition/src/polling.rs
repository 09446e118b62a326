//! Cadência de polling: quando pedir dado ao dispositivo e quanto esperar.
//!
//! Usado apenas pela thread serial. Não faz E/S; só decide.

use std::time::{Duration, Instant};
use thermo_core::config::{AppConfig, PollingStrategy};
use tracing::debug;

/// Fatia máxima de uma leitura bloqueante. Mantém a latência dos comandos
/// manuais (servo) baixa mesmo sem dados chegando.
pub const READ_SLICE: Duration = Duration::from_millis(50);
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollMode {
    /// Envia `request` a cada `period` e espera a resposta por até `reply_window`.
    RequestResponse {
        period: Duration,
        reply_window: Duration,
        request: Vec<u8>,
    },
    /// Apenas escuta; `wake` é enviado uma vez ao conectar.
    Listen { wake: Option<Vec<u8>> },
}

impl PollMode {
    pub fn from_config(config: &AppConfig) -> Self {
        match config.polling.effective_mode(config.sensor.kind) {
            PollingStrategy::Listen => PollMode::Listen {
                wake: config.sensor.wake_bytes(),
            },
            _ => PollMode::RequestResponse {
                period: config.polling.interval(),
                reply_window: config.polling.reply_window(),
                request: config.polling.request_command.as_bytes().to_vec(),
            },
        }
    }
}

/// Contadores de requisição/resposta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub requests: u64,
    pub replies: u64,
    pub missed: u64,
}

/// Decide quando enviar requisições. Nunca há mais de uma pendente.
#[derive(Debug, Clone)]
pub struct PollingController {
    mode: PollMode,
    next_tick: Option<Instant>,
    /// Fim da janela de resposta da requisição pendente
    outstanding_until: Option<Instant>,
    stats: PollStats,
}

impl PollingController {
    pub fn new(mode: PollMode) -> Self {
        Self {
            mode,
            next_tick: None,
            outstanding_until: None,
            stats: PollStats::default(),
        }
    }

    pub fn mode(&self) -> &PollMode {
        &self.mode
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding_until.is_some()
    }

    /// Chamado uma vez logo após abrir a porta. Retorna bytes de wake-up.
    pub fn on_connect(&mut self, now: Instant) -> Option<Vec<u8>> {
        self.outstanding_until = None;
        match &self.mode {
            PollMode::RequestResponse { .. } => {
                self.next_tick = Some(now);
                None
            }
            PollMode::Listen { wake } => wake.clone(),
        }
    }

    /// Retorna a requisição a enviar agora, se houver.
    pub fn poll_request(&mut self, now: Instant) -> Option<Vec<u8>> {
        let PollMode::RequestResponse {
            period,
            reply_window,
            request,
        } = &self.mode
        else {
            return None;
        };

        if let Some(until) = self.outstanding_until {
            if now < until {
                return None;
            }
            // Resposta perdida: não é fatal, o próximo tick tenta de novo
            self.outstanding_until = None;
            self.stats.missed += 1;
            debug!("Sem resposta em {reply_window:?}, pulando");
        }

        let tick = self.next_tick?;
        if now < tick {
            return None;
        }

        // Atrasado não gera rajada: reagenda a partir de agora
        let mut next = tick + *period;
        if next <= now {
            next = now + *period;
        }
        self.next_tick = Some(next);
        self.outstanding_until = Some(now + *reply_window);
        self.stats.requests += 1;
        Some(request.clone())
    }

    /// Uma linha completa chegou.
    pub fn on_line(&mut self) {
        if self.outstanding_until.take().is_some() {
            self.stats.replies += 1;
        }
    }

    /// Quanto a próxima leitura pode bloquear sem atrasar a cadência.
    pub fn read_timeout(&self, now: Instant) -> Duration {
        let next_event = match &self.mode {
            PollMode::Listen { .. } => None,
            PollMode::RequestResponse { .. } => self.outstanding_until.or(self.next_tick),
        };
        let wait = next_event.map_or(READ_SLICE, |at| at.saturating_duration_since(now));
        wait.clamp(MIN_READ_TIMEOUT, READ_SLICE)
    }
}
