//! Early stopping on validation loss.

use serde::Serialize;

/// Where the monitor stands after the latest observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "strikes", rename_all = "snake_case")]
pub enum StoppingState {
    /// The latest value was a new best.
    Improving,
    /// `k` consecutive observations without a new best.
    Waiting(usize),
    /// Patience ran out. Terminal.
    Stopped,
}

/// Tracks the best validation loss seen so far and counts consecutive non-improving epochs.
///
/// A value `v` improves on `best` only if `v < best - min_delta`.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best: Option<f32>,
    best_epoch: usize,
    epochs_seen: usize,
    state: StoppingState,
}

impl EarlyStopping {
    /// `patience` of 0 stops on the first non-improving observation.
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best: None,
            best_epoch: 0,
            epochs_seen: 0,
            state: StoppingState::Improving,
        }
    }

    /// Record one epoch's validation loss and return the new state.
    ///
    /// Once `Stopped`, further observations are ignored.
    pub fn observe(&mut self, value: f32) -> StoppingState {
        if self.state == StoppingState::Stopped {
            return self.state;
        }
        self.epochs_seen += 1;

        let improved = match self.best {
            None => true,
            Some(best) => value < best - self.min_delta,
        };
        if improved {
            self.best = Some(value);
            self.best_epoch = self.epochs_seen;
            self.state = StoppingState::Improving;
            return self.state;
        }

        let strikes = match self.state {
            StoppingState::Waiting(k) => k + 1,
            _ => 1,
        };
        self.state = if strikes >= self.patience {
            StoppingState::Stopped
        } else {
            StoppingState::Waiting(strikes)
        };
        self.state
    }

    #[inline]
    pub fn state(&self) -> StoppingState {
        self.state
    }

    #[inline]
    pub fn should_stop(&self) -> bool {
        self.state == StoppingState::Stopped
    }

    #[inline]
    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// 1-based epoch of the best value (0 before any observation).
    #[inline]
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Epoch (1-based) at which the monitor stops, if it does.
    fn stop_epoch(losses: &[f32], patience: usize) -> Option<usize> {
        let mut es = EarlyStopping::new(patience, 0.0);
        losses
            .iter()
            .position(|&v| es.observe(v) == StoppingState::Stopped)
            .map(|i| i + 1)
    }

    #[test]
    fn stops_after_three_strikes_past_minimum() {
        assert_eq!(stop_epoch(&[0.9, 0.8, 0.85, 0.86, 0.87], 3), Some(5));
    }

    #[test]
    fn new_minimum_resets_strikes() {
        let losses = [0.9, 0.8, 0.95, 0.7, 0.9, 0.95, 1.0];
        let mut es = EarlyStopping::new(3, 0.0);
        let states: Vec<_> = losses.iter().map(|&v| es.observe(v)).collect();
        assert_eq!(states[2], StoppingState::Waiting(1));
        assert_eq!(states[3], StoppingState::Improving);
        assert_eq!(states[5], StoppingState::Waiting(2));
        assert_eq!(states[6], StoppingState::Stopped);
        assert_eq!(es.best(), Some(0.7));
        assert_eq!(es.best_epoch(), 4);
    }

    #[test]
    fn equal_value_is_not_an_improvement() {
        assert_eq!(stop_epoch(&[0.5, 0.5, 0.5, 0.5], 3), Some(4));
    }

    #[test]
    fn min_delta_requires_a_margin() {
        let mut es = EarlyStopping::new(1, 0.1);
        es.observe(1.0);
        assert_eq!(es.observe(0.95), StoppingState::Stopped);
    }

    #[test]
    fn monotone_decrease_never_stops() {
        let losses: Vec<f32> = (0..50).map(|i| 1.0 / (i as f32 + 1.0)).collect();
        assert_eq!(stop_epoch(&losses, 3), None);
    }

    #[test]
    fn stopped_is_terminal() {
        let mut es = EarlyStopping::new(1, 0.0);
        es.observe(1.0);
        es.observe(2.0);
        assert!(es.should_stop());
        assert_eq!(es.observe(0.1), StoppingState::Stopped);
        assert_eq!(es.best(), Some(1.0));
    }
}
