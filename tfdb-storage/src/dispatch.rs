use tfdb_common::{EventRecord, ExpectedVersion, Position, ProposedEvent, StreamId};

/// Result of `ReadStreamEventsBackward`. `next_event_number` is the number
/// to resume from on the next backward page; `-1` once `is_end_of_stream`.
#[derive(Debug, Clone)]
pub struct ReadBackwardCompleted {
    pub events: Vec<EventRecord>,
    pub next_event_number: i64,
    pub is_end_of_stream: bool,
}

/// Outcome of a `WriteEvents` request. Timeout variants are distinguished
/// because the emitted stream retries them identically but treats
/// `WrongExpectedVersion` as a signal to restart instead.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Success {
        first_event_number: u64,
        position: Position,
    },
    WrongExpectedVersion,
    PrepareTimeout,
    ForwardTimeout,
    CommitTimeout,
}

impl WriteOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            WriteOutcome::PrepareTimeout | WriteOutcome::ForwardTimeout | WriteOutcome::CommitTimeout
        )
    }
}

/// Abstract backward-read request-response pair the emitted stream's
/// recovery phase consumes. `from_event_number = -1` means "from the tail".
pub trait ReadDispatcher {
    fn read_stream_events_backward(
        &self,
        stream_id: &StreamId,
        from_event_number: i64,
        max_count: usize,
    ) -> ReadBackwardCompleted;
}

/// Abstract write request-response pair the emitted stream's write phase
/// consumes.
pub trait WriteDispatcher {
    fn write_events(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> WriteOutcome;
}
