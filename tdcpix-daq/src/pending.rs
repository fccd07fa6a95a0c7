//! Actions deferred until the driver reports completion.
//!
//! The completion handler drains this queue in a fixed priority order and
//! stops after the first terminal action, so at most one driver
//! reconfiguration happens per callback.

use std::collections::VecDeque;

use tdcpix_core::Attribute;

/// A queued attribute write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeWrite {
    pub histogram: String,
    pub attribute: Attribute,
    pub value: i64,
}

impl AttributeWrite {
    pub fn new(histogram: impl Into<String>, attribute: Attribute, value: i64) -> Self {
        Self {
            histogram: histogram.into(),
            attribute,
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingAction {
    /// Deactivate the accumulation cube pipe.
    ClosePipe,
    /// Release the driver session.
    Unbind,
    ReadStatistics,
    Write(AttributeWrite),
    StartAccumulation,
    ContinueAccumulation,
}

impl PendingAction {
    /// Terminal actions restart or release the driver themselves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PendingAction::Unbind
                | PendingAction::StartAccumulation
                | PendingAction::ContinueAccumulation
        )
    }
}

#[derive(Debug, Default)]
pub struct PendingActions {
    close_pipe: bool,
    unbind: bool,
    read_statistics: bool,
    writes: VecDeque<AttributeWrite>,
    start_accumulation: bool,
    continue_accumulation: bool,
}

impl PendingActions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_close_pipe(&mut self) {
        self.close_pipe = true;
    }

    pub fn request_unbind(&mut self) {
        self.unbind = true;
    }

    pub fn request_statistics(&mut self) {
        self.read_statistics = true;
    }

    pub fn push_write(&mut self, write: AttributeWrite) {
        self.writes.push_back(write);
    }

    /// A start supersedes a queued continue.
    pub fn request_start_accumulation(&mut self) {
        self.start_accumulation = true;
        self.continue_accumulation = false;
    }

    /// A continue supersedes a queued start.
    pub fn request_continue_accumulation(&mut self) {
        self.continue_accumulation = true;
        self.start_accumulation = false;
    }

    pub fn cancel_accumulation(&mut self) {
        self.start_accumulation = false;
        self.continue_accumulation = false;
    }

    #[must_use]
    pub fn unbind_pending(&self) -> bool {
        self.unbind
    }

    #[must_use]
    pub fn accumulation_pending(&self) -> bool {
        self.start_accumulation || self.continue_accumulation
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.close_pipe
            && !self.unbind
            && !self.read_statistics
            && self.writes.is_empty()
            && !self.accumulation_pending()
    }

    /// Remove the next batch in priority order.
    ///
    /// Order: close pipe, unbind, statistics, writes (FIFO), start
    /// accumulation, continue accumulation. The batch ends with the first
    /// terminal action; everything behind it stays queued.
    pub fn take_batch(&mut self) -> Vec<PendingAction> {
        let mut batch = Vec::new();
        if std::mem::take(&mut self.close_pipe) {
            batch.push(PendingAction::ClosePipe);
        }
        if std::mem::take(&mut self.unbind) {
            batch.push(PendingAction::Unbind);
            return batch;
        }
        if std::mem::take(&mut self.read_statistics) {
            batch.push(PendingAction::ReadStatistics);
        }
        batch.extend(self.writes.drain(..).map(PendingAction::Write));
        if std::mem::take(&mut self.start_accumulation) {
            batch.push(PendingAction::StartAccumulation);
            return batch;
        }
        if std::mem::take(&mut self.continue_accumulation) {
            batch.push(PendingAction::ContinueAccumulation);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(v: i64) -> AttributeWrite {
        AttributeWrite::new("Hist_Live_XY", Attribute::RoiX2, v)
    }

    #[test]
    fn test_priority_order() {
        let mut pending = PendingActions::new();
        pending.request_start_accumulation();
        pending.push_write(write(1));
        pending.request_statistics();
        pending.request_close_pipe();
        let batch = pending.take_batch();
        assert_eq!(
            batch,
            vec![
                PendingAction::ClosePipe,
                PendingAction::ReadStatistics,
                PendingAction::Write(write(1)),
                PendingAction::StartAccumulation,
            ]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unbind_leaves_rest_queued() {
        let mut pending = PendingActions::new();
        pending.push_write(write(1));
        pending.push_write(write(2));
        pending.request_unbind();
        pending.request_statistics();
        assert_eq!(pending.take_batch(), vec![PendingAction::Unbind]);
        assert_eq!(pending.write_count(), 2);
        let batch = pending.take_batch();
        assert_eq!(batch[0], PendingAction::ReadStatistics);
        assert_eq!(batch[1..], [PendingAction::Write(write(1)), PendingAction::Write(write(2))]);
    }

    #[test]
    fn test_writes_fifo_once() {
        let mut pending = PendingActions::new();
        for v in [5, 3, 9] {
            pending.push_write(write(v));
        }
        let values: Vec<i64> = pending
            .take_batch()
            .into_iter()
            .filter_map(|a| match a {
                PendingAction::Write(w) => Some(w.value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![5, 3, 9]);
        assert!(pending.take_batch().is_empty());
    }

    #[test]
    fn test_start_and_continue_supersede() {
        let mut pending = PendingActions::new();
        pending.request_start_accumulation();
        pending.request_continue_accumulation();
        assert_eq!(pending.take_batch(), vec![PendingAction::ContinueAccumulation]);
        pending.request_continue_accumulation();
        pending.cancel_accumulation();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_terminal_flags() {
        assert!(PendingAction::Unbind.is_terminal());
        assert!(PendingAction::StartAccumulation.is_terminal());
        assert!(!PendingAction::ClosePipe.is_terminal());
        assert!(!PendingAction::Write(write(0)).is_terminal());
    }
}
