//! Status - ストアの状態別件数

use serde::{Deserialize, Serialize};

use crate::domain::ScheduleState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCounts {
    pub pending: usize,
    pub publishing: usize,
    pub published: usize,
}

impl ScheduleCounts {
    pub fn record(&mut self, state: ScheduleState) {
        self.add(state, 1);
    }

    pub fn add(&mut self, state: ScheduleState, n: usize) {
        match state {
            ScheduleState::Pending => self.pending += n,
            ScheduleState::Publishing => self.publishing += n,
            ScheduleState::Published => self.published += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.publishing + self.published
    }
}
