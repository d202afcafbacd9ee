use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::generation::GeneratedResult;

#[derive(Debug, Clone)]
pub struct BatchTicket {
    pub generation: u64,
    pub token: CancellationToken,
}

#[derive(Debug)]
struct ActiveBatch {
    generation: u64,
    token: CancellationToken,
}

/// What the presentation side currently shows. Only the most recent batch may
/// write here; anything published by an older batch is dropped.
#[derive(Clone, Default)]
pub struct StudioState {
    active: Arc<Mutex<Option<ActiveBatch>>>,
    last_generation: Arc<Mutex<u64>>,
    results: Arc<Mutex<Vec<GeneratedResult>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl StudioState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new batch, cancelling whichever batch was still running and
    /// clearing the previous results.
    pub fn begin_batch(&self) -> BatchTicket {
        let generation = {
            let mut last = self.last_generation.lock();
            *last += 1;
            *last
        };
        let token = CancellationToken::new();

        let previous = self.active.lock().replace(ActiveBatch {
            generation,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        self.results.lock().clear();
        *self.last_error.lock() = None;

        BatchTicket { generation, token }
    }

    fn finish_if_current(&self, ticket: &BatchTicket) -> bool {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(batch) if batch.generation == ticket.generation => {
                *active = None;
                true
            }
            _ => false,
        }
    }

    /// Stores the results of `ticket`'s batch. Returns `false` when a newer
    /// batch has started since, in which case nothing is stored.
    pub fn publish(&self, ticket: &BatchTicket, results: Vec<GeneratedResult>) -> bool {
        if ticket.token.is_cancelled() || !self.finish_if_current(ticket) {
            return false;
        }
        *self.results.lock() = results;
        true
    }

    pub fn publish_error(&self, ticket: &BatchTicket, message: String) -> bool {
        if !self.finish_if_current(ticket) {
            return false;
        }
        *self.last_error.lock() = Some(message);
        true
    }

    pub fn cancel_active(&self) {
        if let Some(batch) = self.active.lock().as_ref() {
            batch.token.cancel();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn results(&self) -> Vec<GeneratedResult> {
        self.results.lock().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}
