//! Output side of a processor: follow-up commands, events, rejections and the
//! client response for one command.

use crate::appliers::EventAppliers;
use crate::types::*;
use anyhow::Result;
use std::sync::Arc;

/// Everything one command produced, in append order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessingResult {
    pub records: Vec<Record>,
    /// At most one response, and only if the command carried request metadata.
    pub response: Option<Record>,
}

impl ProcessingResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.response.is_none()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.is_command())
    }

    pub fn events(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.is_event())
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.records.iter().find_map(|r| r.rejection.as_ref())
    }
}

/// Per-command result builder handing out the four writer roles.
pub struct Writers {
    appliers: Arc<EventAppliers>,
    result: ProcessingResult,
}

impl Writers {
    pub fn new(appliers: Arc<EventAppliers>) -> Self {
        Self {
            appliers,
            result: ProcessingResult::default(),
        }
    }

    pub fn command(&mut self) -> CommandWriter<'_> {
        CommandWriter {
            result: &mut self.result,
        }
    }

    pub fn state(&mut self) -> StateWriter<'_> {
        StateWriter {
            appliers: &self.appliers,
            result: &mut self.result,
        }
    }

    pub fn rejection(&mut self) -> RejectionWriter<'_> {
        RejectionWriter {
            result: &mut self.result,
        }
    }

    pub fn response(&mut self) -> ResponseWriter<'_> {
        ResponseWriter {
            result: &mut self.result,
        }
    }

    /// Rejection record plus rejection response, with nothing in between.
    pub fn reject<V: RecordValue>(&mut self, command: &TypedRecord<V>, rejection: &Rejection) {
        self.rejection()
            .append_rejection(command, rejection.rejection_type, &rejection.reason);
        self.response()
            .write_rejection_on_command(command, rejection.rejection_type, &rejection.reason);
    }

    /// [`Writers::reject`] for a command whose value type is only known at runtime.
    pub fn reject_record(&mut self, command: &Record, rejection: &Rejection) {
        let record = rejection_record(command.clone(), rejection.rejection_type, &rejection.reason);
        if command.request_id.is_some() && command.request_stream_id.is_some() {
            self.result.response = Some(record.clone());
        }
        self.result.records.push(record);
    }

    pub fn take_result(&mut self) -> ProcessingResult {
        std::mem::take(&mut self.result)
    }

    /// Drops everything written so far. Used when a command is rolled back.
    pub fn reset(&mut self) {
        self.result = ProcessingResult::default();
    }
}

pub struct CommandWriter<'a> {
    result: &'a mut ProcessingResult,
}

impl CommandWriter<'_> {
    pub fn append_follow_up_command<V: RecordValue>(&mut self, key: Key, intent: V::Intent, value: V) {
        self.result.records.push(Record::command(key, intent, value));
    }
}

/// Appends events and applies them to state immediately.
pub struct StateWriter<'a> {
    appliers: &'a EventAppliers,
    result: &'a mut ProcessingResult,
}

impl StateWriter<'_> {
    pub fn append_follow_up_event<V: RecordValue>(
        &mut self,
        key: Key,
        intent: V::Intent,
        value: V,
    ) -> Result<()> {
        let record = Record::event(key, intent, value);
        self.appliers.apply(&record)?;
        self.result.records.push(record);
        Ok(())
    }

    /// Like [`StateWriter::append_follow_up_event`], but the event keeps the
    /// command's request id and stream id, so the request survives in the log
    /// until a later event answers it.
    pub fn append_follow_up_event_on_command<V: RecordValue>(
        &mut self,
        key: Key,
        intent: V::Intent,
        value: V,
        command: &TypedRecord<V>,
    ) -> Result<()> {
        let mut record = Record::event(key, intent, value);
        if let (Some(request_id), Some(request_stream_id)) =
            (command.request_id, command.request_stream_id)
        {
            record = record.with_request(request_id, request_stream_id);
        }
        self.appliers.apply(&record)?;
        self.result.records.push(record);
        Ok(())
    }
}

pub struct RejectionWriter<'a> {
    result: &'a mut ProcessingResult,
}

impl RejectionWriter<'_> {
    pub fn append_rejection<V: RecordValue>(
        &mut self,
        command: &TypedRecord<V>,
        rejection_type: RejectionType,
        reason: &str,
    ) {
        self.result
            .records
            .push(rejection_record(command.to_record(), rejection_type, reason));
    }
}

pub struct ResponseWriter<'a> {
    result: &'a mut ProcessingResult,
}

impl ResponseWriter<'_> {
    pub fn write_event_on_command<V: RecordValue>(
        &mut self,
        key: Key,
        intent: V::Intent,
        value: V,
        command: &TypedRecord<V>,
    ) {
        if let (Some(request_id), Some(stream_id)) = (command.request_id, command.request_stream_id)
        {
            self.write_response(key, intent, value, request_id, stream_id);
        }
    }

    pub fn write_rejection_on_command<V: RecordValue>(
        &mut self,
        command: &TypedRecord<V>,
        rejection_type: RejectionType,
        reason: &str,
    ) {
        if command.has_request_metadata() {
            self.result.response =
                Some(rejection_record(command.to_record(), rejection_type, reason));
        }
    }

    /// Answers a request that was stored earlier, e.g. while listeners ran.
    pub fn write_response<V: RecordValue>(
        &mut self,
        key: Key,
        intent: V::Intent,
        value: V,
        request_id: i64,
        request_stream_id: i32,
    ) {
        self.result.response =
            Some(Record::event(key, intent, value).with_request(request_id, request_stream_id));
    }
}

fn rejection_record(mut record: Record, rejection_type: RejectionType, reason: &str) -> Record {
    record.record_type = RecordType::CommandRejection;
    record.rejection = Some(Rejection::new(rejection_type, reason));
    record
}
