use std::collections::{BTreeMap, VecDeque};

use crate::domain::Matching;
use crate::error::ProtocolViolationError;
use crate::metrics::RequestRecord;

use super::codec::ParsedResponse;

#[derive(Debug)]
enum InFlight {
    Fifo(VecDeque<RequestRecord>),
    Correlated(BTreeMap<u64, RequestRecord>),
}

/// Admission control and response matching for one connection.
#[derive(Debug)]
pub struct Pipeliner {
    limit: usize,
    in_flight: InFlight,
    correlation_header: Option<String>,
}

impl Pipeliner {
    #[must_use]
    pub fn new(limit: usize, matching: &Matching) -> Self {
        let (in_flight, correlation_header) = match matching {
            Matching::Fifo => (InFlight::Fifo(VecDeque::with_capacity(limit)), None),
            Matching::Correlated { header } => (
                InFlight::Correlated(BTreeMap::new()),
                Some(header.as_str().to_owned()),
            ),
        };
        Self {
            limit: limit.max(1),
            in_flight,
            correlation_header,
        }
    }

    #[must_use]
    pub fn admit(&self) -> bool {
        self.depth() < self.limit
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        match &self.in_flight {
            InFlight::Fifo(queue) => queue.len(),
            InFlight::Correlated(pending) => pending.len(),
        }
    }

    /// Tracks a request that has been written to the wire.
    pub fn push(&mut self, record: RequestRecord) {
        match &mut self.in_flight {
            InFlight::Fifo(queue) => queue.push_back(record),
            InFlight::Correlated(pending) => {
                pending.insert(record.seq, record);
            }
        }
    }

    /// Removes a request whose bytes never made it onto the wire.
    pub fn withdraw(&mut self, seq: u64) -> Option<RequestRecord> {
        match &mut self.in_flight {
            InFlight::Fifo(queue) => {
                let position = queue.iter().rposition(|record| record.seq == seq)?;
                queue.remove(position)
            }
            InFlight::Correlated(pending) => pending.remove(&seq),
        }
    }

    /// Pairs a parsed response with the request it answers.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation when nothing is pending or the echoed
    /// correlation id matches no pending request.
    pub fn match_response(
        &mut self,
        response: &ParsedResponse,
    ) -> Result<RequestRecord, ProtocolViolationError> {
        match &mut self.in_flight {
            InFlight::Fifo(queue) => queue
                .pop_front()
                .ok_or(ProtocolViolationError::UnsolicitedResponse),
            InFlight::Correlated(pending) => {
                let raw = response.correlation_id.as_deref().ok_or_else(|| {
                    ProtocolViolationError::MissingCorrelationId {
                        header: self.correlation_header.clone().unwrap_or_default(),
                    }
                })?;
                let id = raw.trim().parse::<u64>().map_err(|_parse| {
                    ProtocolViolationError::InvalidCorrelationId {
                        value: raw.to_owned(),
                    }
                })?;
                pending
                    .remove(&id)
                    .ok_or(ProtocolViolationError::UnmatchedCorrelationId { id })
            }
        }
    }

    /// Takes every pending request, oldest first.
    pub fn drain(&mut self) -> Vec<RequestRecord> {
        match &mut self.in_flight {
            InFlight::Fifo(queue) => queue.drain(..).collect(),
            InFlight::Correlated(pending) => std::mem::take(pending).into_values().collect(),
        }
    }
}
