//! Per-stream ordering and gap detection
//!
//! Each subscription owns a [`Sequencer`]. Frames are ingested in arrival
//! order and the sequencer decides whether the frame is delivered,
//! dropped, or whether the stream has to be rewound.

use stream_protocol::{EventId, StreamPosition};

/// What to do with an ingested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Next in order; deliver to consumers
    Deliver,
    /// The replay reached the point the rewind was requested from
    ResumePointReached,
    /// Already delivered; drop with a warning
    Duplicate,
    /// A rewind is outstanding; drop until it resolves
    AwaitingRewind,
    /// Frames were lost; request a replay from `resume_from`
    Gap { resume_from: u64 },
}

/// Tracks the resume point of one stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequencer {
    last_sequence: Option<u64>,
    last_event_id: Option<EventId>,
    rewinding_from: Option<u64>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known resume point
    pub fn resume_at(sequence: Option<u64>, event_id: Option<EventId>) -> Self {
        Self {
            last_sequence: sequence,
            last_event_id: event_id,
            rewinding_from: None,
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn last_event_id(&self) -> Option<&EventId> {
        self.last_event_id.as_ref()
    }

    pub fn is_rewinding(&self) -> bool {
        self.rewinding_from.is_some()
    }

    pub fn ingest(&mut self, sequence: u64, event_id: Option<&EventId>) -> Ingest {
        let Some(last) = self.last_sequence else {
            return self.accept(sequence, event_id);
        };

        if last.checked_add(1) == Some(sequence) {
            return self.accept(sequence, event_id);
        }

        if sequence <= last {
            if self.rewinding_from == Some(sequence) {
                self.rewinding_from = None;
                return Ingest::ResumePointReached;
            }
            return Ingest::Duplicate;
        }

        if self.rewinding_from.is_some() {
            return Ingest::AwaitingRewind;
        }
        self.rewinding_from = Some(last);
        Ingest::Gap { resume_from: last }
    }

    /// Forget the resume point after the server refused to replay
    pub fn reset(&mut self) {
        self.last_sequence = None;
        self.last_event_id = None;
        self.rewinding_from = None;
    }

    pub fn position(&self, stream_id: &str) -> StreamPosition {
        StreamPosition::at(stream_id, self.last_sequence, self.last_event_id.clone())
    }

    fn accept(&mut self, sequence: u64, event_id: Option<&EventId>) -> Ingest {
        self.last_sequence = Some(sequence);
        self.last_event_id = event_id.cloned();
        // An in-order frame means the replay has caught up.
        self.rewinding_from = None;
        Ingest::Deliver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_delivery() {
        let mut sequencer = Sequencer::new();
        assert_eq!(sequencer.ingest(1, None), Ingest::Deliver);
        assert_eq!(sequencer.ingest(2, None), Ingest::Deliver);
        assert_eq!(sequencer.ingest(3, Some(&EventId::from(30_u64))), Ingest::Deliver);
        assert_eq!(sequencer.last_sequence(), Some(3));
        assert_eq!(sequencer.last_event_id(), Some(&EventId::from(30_u64)));
    }

    #[test]
    fn test_first_frame_is_accepted_at_any_sequence() {
        let mut sequencer = Sequencer::new();
        assert_eq!(sequencer.ingest(41, None), Ingest::Deliver);
        assert_eq!(sequencer.ingest(42, None), Ingest::Deliver);
    }

    #[test]
    fn test_gap_requests_single_rewind() {
        let mut sequencer = Sequencer::new();
        sequencer.ingest(1, None);

        assert_eq!(sequencer.ingest(3, None), Ingest::Gap { resume_from: 1 });
        assert!(sequencer.is_rewinding());
        assert_eq!(sequencer.ingest(4, None), Ingest::AwaitingRewind);
        assert_eq!(sequencer.ingest(5, None), Ingest::AwaitingRewind);
    }

    #[test]
    fn test_replay_resumes_delivery() {
        let mut sequencer = Sequencer::new();
        sequencer.ingest(1, None);
        sequencer.ingest(3, None);

        assert_eq!(sequencer.ingest(1, None), Ingest::ResumePointReached);
        assert!(!sequencer.is_rewinding());
        assert_eq!(sequencer.ingest(2, None), Ingest::Deliver);
        assert_eq!(sequencer.ingest(3, None), Ingest::Deliver);
    }

    #[test]
    fn test_in_order_frame_clears_rewind() {
        let mut sequencer = Sequencer::new();
        sequencer.ingest(1, None);
        sequencer.ingest(3, None);

        assert_eq!(sequencer.ingest(2, None), Ingest::Deliver);
        assert!(!sequencer.is_rewinding());
    }

    #[test]
    fn test_duplicate_is_dropped() {
        let mut sequencer = Sequencer::new();
        sequencer.ingest(1, None);
        sequencer.ingest(2, None);
        assert_eq!(sequencer.ingest(1, None), Ingest::Duplicate);
        assert_eq!(sequencer.ingest(2, None), Ingest::Duplicate);
        assert_eq!(sequencer.last_sequence(), Some(2));
    }

    #[test]
    fn test_max_sequence_is_not_redelivered() {
        let mut sequencer = Sequencer::resume_at(Some(u64::MAX - 1), None);
        assert_eq!(sequencer.ingest(u64::MAX, None), Ingest::Deliver);
        assert_eq!(sequencer.ingest(u64::MAX, None), Ingest::Duplicate);
        assert_eq!(sequencer.last_sequence(), Some(u64::MAX));
    }

    #[test]
    fn test_reset_forgets_position() {
        let mut sequencer = Sequencer::resume_at(Some(9), Some(EventId::from("e9")));
        sequencer.ingest(12, None);
        sequencer.reset();

        assert_eq!(sequencer, Sequencer::new());
        assert_eq!(sequencer.position("urn:a"), StreamPosition::new("urn:a"));
        assert_eq!(sequencer.ingest(100, None), Ingest::Deliver);
    }

    #[test]
    fn test_position_reports_resume_point() {
        let sequencer = Sequencer::resume_at(Some(7), Some(EventId::from(70_u64)));
        assert_eq!(
            sequencer.position("urn:a"),
            StreamPosition::at("urn:a", Some(7), Some(EventId::from(70_u64)))
        );
    }
}
