use crate::dispatch::{ReadDispatcher, WriteDispatcher, WriteOutcome};
use bytes::Bytes;
use std::collections::VecDeque;
use tfdb_common::{
    CheckpointTag, EmittedEvent, EmittedEventMetadata, Error, ExpectedVersion, ProjectionVersion,
    ProposedEvent, Result, StreamId,
};

const DEFAULT_READ_BATCH_SIZE: usize = 64;
const DEFAULT_MAX_WRITE_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Created,
    Recovering,
    Writing,
    CheckpointRequested,
    Disposed,
}

/// A signal the emitter can't resolve itself; the supervisor decides what
/// to do next (restart the projection from scratch, or tear it down).
#[derive(Debug, Clone)]
pub enum SupervisorSignal {
    RestartRequested,
    Failed(String),
}

struct RecoveredEvent {
    tag: CheckpointTag,
    event_type: String,
    event_number: u64,
}

/// Single-writer sink projecting derived events into one target stream,
/// deduplicating against what's already committed there on every restart.
pub struct EmittedStream<D> {
    target_stream: StreamId,
    version: ProjectionVersion,
    dispatcher: D,
    state: EmitterState,
    pending: VecDeque<EmittedEvent>,
    last_accepted_tag: Option<CheckpointTag>,
    last_submitted_or_committed: Option<CheckpointTag>,
    recovered: VecDeque<RecoveredEvent>,
    read_batch_size: usize,
    max_write_retries: u32,
}

impl<D> EmittedStream<D>
where
    D: ReadDispatcher + WriteDispatcher,
{
    pub fn new(target_stream: StreamId, version: ProjectionVersion, dispatcher: D) -> Self {
        Self {
            target_stream,
            version,
            dispatcher,
            state: EmitterState::Created,
            pending: VecDeque::new(),
            last_accepted_tag: None,
            last_submitted_or_committed: None,
            recovered: VecDeque::new(),
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            max_write_retries: DEFAULT_MAX_WRITE_RETRIES,
        }
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != EmitterState::Created {
            return Err(Error::InvalidOperation(
                "start() is only valid from the Created state".to_string(),
            ));
        }

        self.state = EmitterState::Recovering;
        Ok(())
    }

    /// Enqueues a batch of events that must share `causedByTag` and
    /// `streamId`, the tag strictly greater than the last accepted one.
    pub fn emit_events(&mut self, batch: Vec<EmittedEvent>) -> Result<()> {
        if self.state == EmitterState::Disposed {
            return Err(Error::InvalidOperation(
                "emit_events() called on a disposed emitter".to_string(),
            ));
        }

        if self.state == EmitterState::CheckpointRequested {
            return Err(Error::InvalidOperation(
                "emit_events() called while a checkpoint is pending".to_string(),
            ));
        }

        let Some(first) = batch.first() else {
            return Ok(());
        };

        let tag = first.caused_by_tag;
        let stream_id = first.stream_id.clone();

        for event in &batch {
            if event.caused_by_tag != tag || event.stream_id != stream_id {
                return Err(Error::InvalidOperation(
                    "emit_events() batch must share one causedByTag and one streamId".to_string(),
                ));
            }
        }

        if let Some(last) = self.last_accepted_tag {
            if tag <= last {
                return Err(Error::InvalidOperation(
                    "causedByTag must strictly increase across emit_events() calls".to_string(),
                ));
            }
        }

        self.last_accepted_tag = Some(tag);
        self.pending.extend(batch);
        Ok(())
    }

    pub fn checkpoint(&mut self) -> Result<()> {
        match self.state {
            EmitterState::Created | EmitterState::Disposed => Err(Error::InvalidOperation(
                "checkpoint() requires the emitter to be started".to_string(),
            )),
            EmitterState::CheckpointRequested => Err(Error::InvalidOperation(
                "a checkpoint is already pending".to_string(),
            )),
            _ => {
                self.state = EmitterState::CheckpointRequested;
                Ok(())
            }
        }
    }

    /// Drives the state machine forward: performs recovery if needed, then
    /// drains as much of `pending` as dedup and the dispatcher allow.
    /// Returns a signal when the supervisor must intervene.
    pub fn pump(&mut self) -> Result<Option<SupervisorSignal>> {
        if self.state == EmitterState::Recovering {
            if let Some(signal) = self.recover()? {
                return Ok(Some(signal));
            }
        }

        while self.state == EmitterState::Writing && !self.pending.is_empty() {
            if self.try_dedup_front() {
                continue;
            }

            if let Some(signal) = self.write_front()? {
                return Ok(Some(signal));
            }
        }

        Ok(None)
    }

    /// Reads the target stream backward from the tail, collecting already
    /// committed events back to the earliest pending event's tag (or the
    /// start of the stream), then hands control to the write path.
    fn recover(&mut self) -> Result<Option<SupervisorSignal>> {
        let Some(up_to) = self.pending.front().map(|e| e.caused_by_tag) else {
            return Ok(None);
        };

        let mut newest_tag = None;
        let mut collected = Vec::new();
        let mut from_event_number = -1i64;
        let mut checked_lineage = false;

        loop {
            let page =
                self.dispatcher
                    .read_stream_events_backward(&self.target_stream, from_event_number, self.read_batch_size);

            for record in &page.events {
                let Ok(metadata) = serde_json::from_slice::<EmittedEventMetadata>(&record.metadata) else {
                    continue;
                };

                if !checked_lineage {
                    checked_lineage = true;
                    if self.version.projection_id != metadata.projection_version.projection_id {
                        self.state = EmitterState::Disposed;
                        return Ok(Some(SupervisorSignal::Failed(format!(
                            "target stream is owned by projection '{}', not '{}'",
                            metadata.projection_version.projection_id, self.version.projection_id
                        ))));
                    }
                }

                if metadata.projection_version.version < self.version.epoch {
                    continue;
                }

                if newest_tag.is_none() {
                    newest_tag = Some(metadata.tag);
                }

                if metadata.tag < up_to {
                    self.finish_recovery(newest_tag, collected);
                    return Ok(None);
                }

                collected.push(RecoveredEvent {
                    tag: metadata.tag,
                    event_type: record.event_type.clone(),
                    event_number: record.event_number,
                });
            }

            if page.is_end_of_stream {
                self.finish_recovery(newest_tag, collected);
                return Ok(None);
            }

            from_event_number = page.next_event_number;
        }
    }

    fn finish_recovery(&mut self, newest_tag: Option<CheckpointTag>, mut collected: Vec<RecoveredEvent>) {
        self.last_submitted_or_committed = newest_tag;
        collected.reverse();
        self.recovered = collected.into();
        self.state = EmitterState::Writing;
    }

    /// If the next pending event is covered by already-committed history,
    /// pops it from both queues and fires `on_committed`. Returns `true` if
    /// it consumed a pending event this way.
    fn try_dedup_front(&mut self) -> bool {
        let Some(front) = self.pending.front() else {
            return false;
        };

        let within_committed_range = match self.last_submitted_or_committed {
            Some(last) => front.caused_by_tag <= last,
            None => false,
        };

        if !within_committed_range {
            return false;
        }

        match self.recovered.pop_front() {
            Some(existing) if existing.tag == front.caused_by_tag && existing.event_type == front.event_type => {
                let mut event = self.pending.pop_front().unwrap();
                if let Some(callback) = event.on_committed.take() {
                    callback(existing.event_number);
                }
                true
            }
            _ => {
                self.state = EmitterState::Disposed;
                false
            }
        }
    }

    fn write_front(&mut self) -> Result<Option<SupervisorSignal>> {
        let front = self.pending.front().expect("checked non-empty by caller");

        if let Some(expected) = front.expected_tag {
            if Some(expected) != self.last_submitted_or_committed {
                self.state = EmitterState::Disposed;
                return Ok(Some(SupervisorSignal::RestartRequested));
            }
        }

        let event = self.pending.pop_front().unwrap();
        let proposed = ProposedEvent::new(event.event_type.clone(), event.payload.clone())
            .with_id(event.event_id)
            .with_metadata(encode_metadata(&event, &self.version));

        let mut attempts = 0;

        loop {
            let outcome =
                self.dispatcher
                    .write_events(&event.stream_id, ExpectedVersion::Any, vec![proposed.clone()]);

            match outcome {
                WriteOutcome::Success { first_event_number, .. } => {
                    self.last_submitted_or_committed = Some(event.caused_by_tag);
                    if let Some(callback) = event.on_committed {
                        callback(first_event_number);
                    }
                    return Ok(None);
                }
                WriteOutcome::WrongExpectedVersion => {
                    self.state = EmitterState::Disposed;
                    return Ok(Some(SupervisorSignal::RestartRequested));
                }
                timeout if timeout.is_timeout() => {
                    attempts += 1;
                    if attempts > self.max_write_retries {
                        self.state = EmitterState::Disposed;
                        return Ok(Some(SupervisorSignal::Failed(
                            "write retries exhausted".to_string(),
                        )));
                    }
                }
                _ => unreachable!("WriteOutcome exhausted by the arms above"),
            }
        }
    }
}

fn encode_metadata(event: &EmittedEvent, version: &ProjectionVersion) -> Bytes {
    let metadata = event.metadata(version.clone());
    Bytes::from(serde_json::to_vec(&metadata).expect("EmittedEventMetadata always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tfdb_common::{EventRecord, Position};

    struct FakeDispatcher {
        history: RefCell<Vec<EventRecord>>,
        write_log: RefCell<Vec<ProposedEvent>>,
    }

    impl FakeDispatcher {
        fn empty() -> Self {
            Self {
                history: RefCell::new(Vec::new()),
                write_log: RefCell::new(Vec::new()),
            }
        }

        fn with_history(history: Vec<EventRecord>) -> Self {
            Self {
                history: RefCell::new(history),
                write_log: RefCell::new(Vec::new()),
            }
        }
    }

    fn committed_event(
        stream_id: &StreamId,
        event_number: u64,
        event_type: &str,
        projection_version: ProjectionVersion,
        tag: CheckpointTag,
    ) -> EventRecord {
        let metadata = EmittedEventMetadata {
            tag,
            projection_version,
            extra: serde_json::Map::new(),
        };

        EventRecord {
            id: uuid::Uuid::new_v4(),
            stream_id: stream_id.clone(),
            event_number,
            position: Position::of(event_number),
            event_type: event_type.to_string(),
            data: Bytes::new(),
            metadata: Bytes::from(serde_json::to_vec(&metadata).unwrap()),
            created: chrono::Utc::now(),
        }
    }

    impl ReadDispatcher for FakeDispatcher {
        fn read_stream_events_backward(
            &self,
            _stream_id: &StreamId,
            _from_event_number: i64,
            _max_count: usize,
        ) -> crate::dispatch::ReadBackwardCompleted {
            crate::dispatch::ReadBackwardCompleted {
                events: self.history.borrow().iter().rev().cloned().collect(),
                next_event_number: -1,
                is_end_of_stream: true,
            }
        }
    }

    impl WriteDispatcher for FakeDispatcher {
        fn write_events(
            &self,
            _stream_id: &StreamId,
            _expected_version: ExpectedVersion,
            events: Vec<ProposedEvent>,
        ) -> WriteOutcome {
            let next_number = self.write_log.borrow().len() as u64;
            self.write_log.borrow_mut().extend(events);
            WriteOutcome::Success {
                first_event_number: next_number,
                position: Position::of(next_number),
            }
        }
    }

    fn tag(offset: i64) -> CheckpointTag {
        CheckpointTag {
            commit_position: offset,
            prepare_position: offset,
        }
    }

    fn version() -> ProjectionVersion {
        ProjectionVersion {
            projection_id: "proj-a".to_string(),
            epoch: 0,
            version: 0,
        }
    }

    #[test]
    fn emits_fresh_events_against_empty_target_stream() {
        let dispatcher = FakeDispatcher::empty();
        let mut emitter = EmittedStream::new(StreamId::new("proj-a-result"), version(), dispatcher);

        emitter.start().unwrap();
        emitter
            .emit_events(vec![EmittedEvent::new(
                StreamId::new("proj-a-result"),
                "Emitted",
                Bytes::new(),
                tag(10),
            )])
            .unwrap();

        let signal = emitter.pump().unwrap();
        assert!(signal.is_none());
        assert_eq!(emitter.dispatcher.write_log.borrow().len(), 1);
    }

    #[test]
    fn rejects_batch_with_mixed_caused_by_tag() {
        let dispatcher = FakeDispatcher::empty();
        let mut emitter = EmittedStream::new(StreamId::new("proj-a-result"), version(), dispatcher);
        emitter.start().unwrap();

        let stream = StreamId::new("proj-a-result");
        let batch = vec![
            EmittedEvent::new(stream.clone(), "A", Bytes::new(), tag(1)),
            EmittedEvent::new(stream, "B", Bytes::new(), tag(2)),
        ];

        assert!(emitter.emit_events(batch).is_err());
    }

    #[test]
    fn non_increasing_tag_across_calls_is_rejected() {
        let dispatcher = FakeDispatcher::empty();
        let mut emitter = EmittedStream::new(StreamId::new("proj-a-result"), version(), dispatcher);
        emitter.start().unwrap();

        let stream = StreamId::new("proj-a-result");
        emitter
            .emit_events(vec![EmittedEvent::new(stream.clone(), "A", Bytes::new(), tag(5))])
            .unwrap();

        let err = emitter.emit_events(vec![EmittedEvent::new(stream, "B", Bytes::new(), tag(5))]);
        assert!(err.is_err());
    }

    #[test]
    fn restarting_with_an_already_committed_event_dedupes_instead_of_rewriting() {
        let stream = StreamId::new("proj-a-result");
        let history = vec![committed_event(&stream, 0, "Emitted", version(), tag(10))];
        let dispatcher = FakeDispatcher::with_history(history);
        let mut emitter = EmittedStream::new(stream.clone(), version(), dispatcher);

        emitter.start().unwrap();
        emitter
            .emit_events(vec![EmittedEvent::new(stream, "Emitted", Bytes::new(), tag(10))])
            .unwrap();

        let signal = emitter.pump().unwrap();
        assert!(signal.is_none());
        assert!(emitter.dispatcher.write_log.borrow().is_empty());
        assert_eq!(emitter.state(), EmitterState::Writing);
    }

    #[test]
    fn a_target_stream_owned_by_another_projection_fails_without_writing() {
        let stream = StreamId::new("proj-a-result");
        let foreign = ProjectionVersion {
            projection_id: "proj-b".to_string(),
            epoch: 0,
            version: 0,
        };
        let history = vec![committed_event(&stream, 0, "Emitted", foreign, tag(10))];
        let dispatcher = FakeDispatcher::with_history(history);
        let mut emitter = EmittedStream::new(stream.clone(), version(), dispatcher);

        emitter.start().unwrap();
        emitter
            .emit_events(vec![EmittedEvent::new(stream, "Emitted", Bytes::new(), tag(20))])
            .unwrap();

        let signal = emitter.pump().unwrap();
        assert!(matches!(signal, Some(SupervisorSignal::Failed(_))));
        assert!(emitter.dispatcher.write_log.borrow().is_empty());
        assert_eq!(emitter.state(), EmitterState::Disposed);
    }

    #[test]
    fn a_retired_epoch_record_is_skipped_not_collected_and_not_hard_failed() {
        let stream = StreamId::new("proj-a-result");
        let current = ProjectionVersion {
            projection_id: "proj-a".to_string(),
            epoch: 2,
            version: 2,
        };
        let retired = ProjectionVersion {
            projection_id: "proj-a".to_string(),
            epoch: 0,
            version: 0,
        };

        let history = vec![
            committed_event(&stream, 0, "Emitted", retired, tag(5)),
            committed_event(&stream, 1, "Emitted", current.clone(), tag(10)),
        ];
        let dispatcher = FakeDispatcher::with_history(history);
        let mut emitter = EmittedStream::new(stream.clone(), current, dispatcher);

        emitter.start().unwrap();
        emitter
            .emit_events(vec![EmittedEvent::new(stream, "Emitted", Bytes::new(), tag(10))])
            .unwrap();

        let signal = emitter.pump().unwrap();
        assert!(signal.is_none());
        assert!(emitter.dispatcher.write_log.borrow().is_empty());
        assert_eq!(emitter.state(), EmitterState::Writing);
    }

    #[test]
    fn a_stale_expected_tag_requests_a_restart_instead_of_writing() {
        let dispatcher = FakeDispatcher::empty();
        let mut emitter = EmittedStream::new(StreamId::new("proj-a-result"), version(), dispatcher);
        emitter.start().unwrap();

        let stream = StreamId::new("proj-a-result");
        let mut event = EmittedEvent::new(stream, "Emitted", Bytes::new(), tag(10));
        event.expected_tag = Some(tag(999));
        emitter.emit_events(vec![event]).unwrap();

        let signal = emitter.pump().unwrap();
        assert!(matches!(signal, Some(SupervisorSignal::RestartRequested)));
        assert!(emitter.dispatcher.write_log.borrow().is_empty());
        assert_eq!(emitter.state(), EmitterState::Disposed);
    }
}
