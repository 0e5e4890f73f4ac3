//! Per-round buffer of station reports held by a cluster head.
//!
//! Capacity is fixed when the round starts. Once full, later reports are
//! refused and counted; nothing already buffered is evicted.

use crate::codec::{self, CodecError};
use crate::types::Report;

#[derive(Debug, Clone)]
pub struct AggregateBuffer {
    records: Vec<Report>,
    capacity: usize,
    refused: usize,
}

impl AggregateBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            refused: 0,
        }
    }

    /// Append a report; false if the buffer is full
    pub fn push(&mut self, report: Report) -> bool {
        if self.records.len() >= self.capacity {
            self.refused += 1;
            return false;
        }
        self.records.push(report);
        true
    }

    pub fn records(&self) -> &[Report] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Reports refused because the buffer was full
    pub fn refused(&self) -> usize {
        self.refused
    }

    /// Uplink payload: every record as a report frame, in arrival order
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::with_capacity(self.records.len() * codec::MAX_MESSAGE_LEN);
        for report in &self.records {
            payload.extend_from_slice(codec::encode_report(report)?.as_bytes());
        }
        Ok(payload)
    }

    /// Split an uplink payload back into reports
    pub fn decode(payload: &[u8]) -> Result<Vec<Report>, CodecError> {
        payload
            .split(|b| *b == b';')
            .skip(1)
            .map(|frame| {
                let mut framed = Vec::with_capacity(frame.len() + 1);
                framed.push(b';');
                framed.extend_from_slice(frame);
                codec::decode_report(&framed)
            })
            .collect()
    }
}
