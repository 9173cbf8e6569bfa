use std::sync::Arc;
use tfdb_common::{ExpectedVersion, ProposedEvent, StreamId};
use tfdb_storage::{EventStore, ReadBackwardCompleted, ReadDispatcher, WriteDispatcher, WriteOutcome};

/// In-process stand-in for the out-of-scope wire dispatchers: resolves
/// reads and writes synchronously against a local `EventStore` instead of
/// forwarding them to a TCP client/server boundary.
pub struct LocalDispatcher {
    store: Arc<EventStore>,
}

impl LocalDispatcher {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }
}

impl ReadDispatcher for LocalDispatcher {
    fn read_stream_events_backward(
        &self,
        stream_id: &StreamId,
        from_event_number: i64,
        max_count: usize,
    ) -> ReadBackwardCompleted {
        match self.store.read_stream_backward(stream_id, from_event_number, max_count) {
            Ok((events, next_event_number, is_end_of_stream)) => ReadBackwardCompleted {
                events,
                next_event_number,
                is_end_of_stream,
            },
            Err(error) => {
                tracing::error!(%error, "read_stream_events_backward failed");
                ReadBackwardCompleted {
                    events: Vec::new(),
                    next_event_number: -1,
                    is_end_of_stream: true,
                }
            }
        }
    }
}

impl WriteDispatcher for LocalDispatcher {
    fn write_events(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> WriteOutcome {
        match self.store.append(stream_id, expected_version, events) {
            Ok(result) => WriteOutcome::Success {
                first_event_number: result.next_expected_version,
                position: result.position,
            },
            Err(tfdb_common::Error::WrongExpectedVersion { .. }) => WriteOutcome::WrongExpectedVersion,
            Err(error) => {
                tracing::error!(%error, "write_events failed");
                WriteOutcome::CommitTimeout
            }
        }
    }
}
