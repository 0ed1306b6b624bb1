/// Halts training once the validation score has failed to improve on its best for `patience`
/// consecutive checks. Lower scores are better.
#[derive(Clone, Debug, PartialEq)]
pub struct EarlyStopping {
    pub best_score: f32,
    pub strikes_remaining: usize,
    patience: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            best_score: f32::INFINITY,
            strikes_remaining: patience,
            patience,
        }
    }

    /// Returns `true` when training should stop.
    pub fn check(&mut self, score: f32) -> bool {
        if score < self.best_score {
            self.best_score = score;
            self.strikes_remaining = self.patience;
        } else {
            self.strikes_remaining = self.strikes_remaining.saturating_sub(1);
        }

        self.strikes_remaining == 0
    }
}
