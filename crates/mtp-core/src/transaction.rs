//! PTP transaction engine.
//!
//! Drives one operation → optional data phase → response exchange over the
//! bulk pipes, one non-blocking step per [`TransactionEngine::advance`] call.
//!
//! ## Phases
//!
//! ```text
//!            begin()
//!   Idle ───────────► SendOperation ──► AwaitOperationAck
//!    ▲                                       │ Done
//!    │             ┌─────────────────────────┼──────────────────────────┐
//!    │             ▼ send                    ▼ none                     ▼ receive
//!    │      SendDataChunk ◄─┐          AwaitResponse ◄───────┐   ReceiveDataChunk ◄─┐
//!    │             │        │ more           │               │          │           │ more
//!    │             ▼        │                ▼               │          ▼           │
//!    │      AwaitDataChunkAck ──► (done) AwaitResponseArrival │  AwaitDataChunkArrival
//!    │                                       │               └──────────┘ (done)
//!    └──────────── OK / non-OK response ─────┘
//!
//!   any Stalled ──► Faulted   (left by the next begin())
//! ```
//!
//! Retry on any await phase re-enters the preceding submit phase with the same
//! bytes and the same transaction id.

use crate::codes::OperationCode;
use crate::container::{
    decode_response, encode_data_header, encode_operation, Container, ContainerHeader,
    ContainerType, Params, TransactionId, HEADER_LEN,
};
use crate::error::{Error, Result};
use crate::transport::{MtpPipes, Pipe, TransferState, UsbHost};
use core::fmt;
use core::task::Poll;

/// Callback handed each chunk-threshold-sized slice of a data phase payload,
/// plus a final shorter tail.
pub type ChunkSink = Box<dyn FnMut(&[u8]) + Send>;

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transaction.
    Idle,
    /// Operation container ready to submit.
    SendOperation,
    /// Operation container submitted.
    AwaitOperationAck,
    /// Next outgoing data packet ready to submit.
    SendDataChunk,
    /// Outgoing data packet submitted.
    AwaitDataChunkAck,
    /// Next incoming data packet ready to arm.
    ReceiveDataChunk,
    /// Incoming data packet armed.
    AwaitDataChunkArrival,
    /// Response receive ready to arm.
    AwaitResponse,
    /// Response receive armed.
    AwaitResponseArrival,
    /// A pipe stalled or the device sent garbage.
    Faulted,
}

/// Direction of the data phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPhase {
    /// Operation and response only.
    None,
    /// Host sends this payload after the operation.
    Send(Vec<u8>),
    /// Device sends a payload after the operation.
    Receive,
}

/// One operation request.
pub struct Request {
    /// Operation code.
    pub code: OperationCode,
    /// Operation parameters.
    pub params: Params,
    /// Data phase.
    pub data: DataPhase,
    /// Optional streaming sink. When set, received payload is handed to it
    /// and not retained.
    pub sink: Option<ChunkSink>,
}

impl Request {
    /// Request without a data phase.
    pub fn new(code: OperationCode, params: Params) -> Self {
        Request {
            code,
            params,
            data: DataPhase::None,
            sink: None,
        }
    }

    /// Request expecting a data-in phase.
    pub fn receiving(code: OperationCode, params: Params) -> Self {
        Request {
            data: DataPhase::Receive,
            ..Request::new(code, params)
        }
    }

    /// Request with a data-out phase carrying `payload`.
    pub fn sending(code: OperationCode, params: Params, payload: Vec<u8>) -> Self {
        Request {
            data: DataPhase::Send(payload),
            ..Request::new(code, params)
        }
    }

    /// Attach a chunk sink.
    pub fn with_sink(mut self, sink: ChunkSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("code", &self.code)
            .field("params", &self.params)
            .field("data", &self.data)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Successful transaction result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The OK response.
    pub response: Container,
    /// Received payload; empty for streamed or data-less transactions.
    pub data: Vec<u8>,
}

impl Completion {
    /// First response parameter, or 0.
    pub fn param1(&self) -> u32 {
        self.response.params.get(0).unwrap_or(0)
    }
}

enum Direction {
    None,
    Send,
    Receive,
}

/// State of the transaction in flight.
struct Active {
    code: OperationCode,
    tid: TransactionId,
    operation: Vec<u8>,
    direction: Direction,
    /// Outgoing data container (header + payload).
    outgoing: Vec<u8>,
    /// Bytes of `outgoing` the device acknowledged.
    cursor: usize,
    /// Size of the packet currently submitted.
    inflight: usize,
    /// Expected incoming payload length, known after the first packet.
    expected: Option<usize>,
    received: usize,
    /// Received payload. With a sink this only holds bytes not yet handed out.
    staging: Vec<u8>,
    /// Payload bytes already reported at a chunk boundary.
    reported: usize,
    sink: Option<ChunkSink>,
    chunks: usize,
}

impl Active {
    fn chunk_boundaries(&mut self, threshold: usize, finished: bool) {
        match self.direction {
            Direction::Send => {
                let acked = self.cursor.saturating_sub(HEADER_LEN);
                while acked - self.reported >= threshold
                    || (finished && acked > self.reported)
                {
                    let end = (self.reported + threshold).min(acked);
                    if let Some(sink) = self.sink.as_mut() {
                        sink(&self.outgoing[HEADER_LEN + self.reported..HEADER_LEN + end]);
                    }
                    self.reported = end;
                    self.chunks += 1;
                }
            }
            Direction::Receive => {
                if let Some(sink) = self.sink.as_mut() {
                    while self.staging.len() >= threshold
                        || (finished && !self.staging.is_empty())
                    {
                        let end = threshold.min(self.staging.len());
                        sink(&self.staging[..end]);
                        self.staging.drain(..end);
                        self.reported += end;
                        self.chunks += 1;
                    }
                } else {
                    while self.received - self.reported >= threshold
                        || (finished && self.received > self.reported)
                    {
                        self.reported = (self.reported + threshold).min(self.received);
                        self.chunks += 1;
                    }
                }
            }
            Direction::None => {}
        }
    }
}

/// The PTP transaction engine for one claimed interface.
///
/// At most one transaction is in flight; [`begin`](Self::begin) while busy
/// fails with [`Error::Busy`].
pub struct TransactionEngine {
    phase: Phase,
    bulk_in: Pipe,
    bulk_out: Pipe,
    chunk_packets: usize,
    next_tid: u32,
    last_tid: Option<TransactionId>,
    last_chunks: usize,
    active: Option<Active>,
}

impl TransactionEngine {
    /// Engine over the bulk pipes of `pipes`. The chunk-boundary callback
    /// fires every `chunk_packets` max packets of payload.
    pub fn new(pipes: &MtpPipes, chunk_packets: usize) -> Self {
        TransactionEngine {
            phase: Phase::Idle,
            bulk_in: pipes.bulk_in,
            bulk_out: pipes.bulk_out,
            chunk_packets: chunk_packets.max(1),
            next_tid: 1,
            last_tid: None,
            last_chunks: 0,
            active: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True when no transaction is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Faulted)
    }

    /// Id of the transaction in flight, or of the last one issued.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.active.as_ref().map(|a| a.tid).or(self.last_tid)
    }

    /// Id the next [`begin`](Self::begin) will use.
    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.next_tid)
    }

    /// Chunk-boundary count of the last finished data phase.
    pub fn last_chunk_count(&self) -> usize {
        self.last_chunks
    }

    /// Restart transaction numbering at 1. Called when a session opens.
    pub fn reset_transaction_ids(&mut self) {
        self.next_tid = 1;
    }

    /// Start a transaction. Valid from Idle or Faulted.
    pub fn begin(&mut self, request: Request) -> Result<TransactionId> {
        if !self.is_idle() {
            return Err(Error::Busy);
        }
        let tid = TransactionId(self.next_tid);
        self.next_tid = match self.next_tid.wrapping_add(1) {
            0 => 1,
            n => n,
        };

        let (direction, outgoing) = match request.data {
            DataPhase::None => (Direction::None, Vec::new()),
            DataPhase::Receive => (Direction::Receive, Vec::new()),
            DataPhase::Send(payload) => {
                let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
                bytes.extend_from_slice(&encode_data_header(request.code, tid, payload.len()));
                bytes.extend_from_slice(&payload);
                (Direction::Send, bytes)
            }
        };

        tracing::debug!(code = %request.code, %tid, params = ?request.params.as_slice(), "begin transaction");
        self.active = Some(Active {
            code: request.code,
            tid,
            operation: encode_operation(request.code, tid, &request.params),
            direction,
            outgoing,
            cursor: 0,
            inflight: 0,
            expected: None,
            received: 0,
            staging: Vec::new(),
            reported: 0,
            sink: request.sink,
            chunks: 0,
        });
        self.last_tid = Some(tid);
        self.phase = Phase::SendOperation;
        Ok(tid)
    }

    /// Give up on the transaction in flight. The engine is left Faulted; the
    /// caller must clear the pipes before the next operation.
    pub fn abandon(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::warn!(code = %active.code, tid = %active.tid, phase = ?self.phase, "transaction abandoned");
            self.phase = Phase::Faulted;
        }
    }

    /// Run one step.
    ///
    /// Returns `Pending` while the transaction is in progress, then exactly
    /// once `Ready` with the outcome. Calling it with nothing in flight is an
    /// [`Error::InvalidState`].
    pub fn advance<H: UsbHost>(&mut self, host: &mut H) -> Poll<Result<Completion>> {
        let Some(active) = self.active.as_mut() else {
            return Poll::Ready(Err(Error::InvalidState));
        };

        match self.phase {
            Phase::Idle | Phase::Faulted => Poll::Ready(Err(Error::InvalidState)),

            Phase::SendOperation => {
                if let Err(e) = host.submit_send(self.bulk_out.id, &active.operation) {
                    return self.fault(e);
                }
                self.set_phase(Phase::AwaitOperationAck)
            }

            Phase::AwaitOperationAck => match host.poll(self.bulk_out.id) {
                TransferState::Done => {
                    let next = match active.direction {
                        Direction::None => Phase::AwaitResponse,
                        Direction::Send => Phase::SendDataChunk,
                        Direction::Receive => Phase::ReceiveDataChunk,
                    };
                    self.set_phase(next)
                }
                TransferState::Retry => self.set_phase(Phase::SendOperation),
                TransferState::Stalled => self.fault(Error::Stalled {
                    pipe: self.bulk_out.id,
                }),
                TransferState::Pending => Poll::Pending,
            },

            Phase::SendDataChunk => {
                let end = (active.cursor + self.bulk_out.max_packet).min(active.outgoing.len());
                let chunk = &active.outgoing[active.cursor..end];
                active.inflight = chunk.len();
                if let Err(e) = host.submit_send(self.bulk_out.id, chunk) {
                    return self.fault(e);
                }
                self.set_phase(Phase::AwaitDataChunkAck)
            }

            Phase::AwaitDataChunkAck => match host.poll(self.bulk_out.id) {
                TransferState::Done => {
                    // A short write leaves the rest of the chunk to resend.
                    let sent = host.bytes_transferred(self.bulk_out.id).min(active.inflight);
                    if sent < active.inflight {
                        tracing::debug!(tid = %active.tid, sent, submitted = active.inflight, "short bulk write");
                    }
                    active.cursor += sent;
                    active.inflight = 0;
                    let threshold = self.bulk_out.max_packet * self.chunk_packets;
                    if active.cursor < active.outgoing.len() {
                        active.chunk_boundaries(threshold, false);
                        self.set_phase(Phase::SendDataChunk)
                    } else {
                        active.chunk_boundaries(threshold, true);
                        self.last_chunks = active.chunks;
                        self.set_phase(Phase::AwaitResponse)
                    }
                }
                TransferState::Retry => self.set_phase(Phase::SendDataChunk),
                TransferState::Stalled => self.fault(Error::Stalled {
                    pipe: self.bulk_out.id,
                }),
                TransferState::Pending => Poll::Pending,
            },

            Phase::ReceiveDataChunk => {
                if let Err(e) = host.submit_receive(self.bulk_in.id, self.bulk_in.max_packet) {
                    return self.fault(e);
                }
                self.set_phase(Phase::AwaitDataChunkArrival)
            }

            Phase::AwaitDataChunkArrival => match host.poll(self.bulk_in.id) {
                TransferState::Done => {
                    let packet = host.received(self.bulk_in.id).to_vec();
                    self.on_data_packet(&packet)
                }
                TransferState::Retry => self.set_phase(Phase::ReceiveDataChunk),
                TransferState::Stalled => self.fault(Error::Stalled {
                    pipe: self.bulk_in.id,
                }),
                TransferState::Pending => Poll::Pending,
            },

            Phase::AwaitResponse => {
                if let Err(e) = host.submit_receive(self.bulk_in.id, self.bulk_in.max_packet) {
                    return self.fault(e);
                }
                self.set_phase(Phase::AwaitResponseArrival)
            }

            Phase::AwaitResponseArrival => match host.poll(self.bulk_in.id) {
                TransferState::Done => {
                    let packet = host.received(self.bulk_in.id);
                    if packet.is_empty() {
                        tracing::warn!(tid = %active.tid, "zero-length packet before response, re-arming");
                        return self.set_phase(Phase::AwaitResponse);
                    }
                    match decode_response(packet) {
                        Ok(response) => self.finish(response),
                        Err(e) => self.fault(e),
                    }
                }
                TransferState::Retry => self.set_phase(Phase::AwaitResponse),
                TransferState::Stalled => self.fault(Error::Stalled {
                    pipe: self.bulk_in.id,
                }),
                TransferState::Pending => Poll::Pending,
            },
        }
    }

    fn on_data_packet(&mut self, packet: &[u8]) -> Poll<Result<Completion>> {
        let threshold = self.bulk_in.max_packet * self.chunk_packets;
        let max_packet = self.bulk_in.max_packet;
        let Some(active) = self.active.as_mut() else {
            return Poll::Ready(Err(Error::InvalidState));
        };

        let payload = match active.expected {
            Some(_) => packet,
            None => {
                let header = match ContainerHeader::parse(packet) {
                    Ok(header) => header,
                    Err(e) => return self.fault(e),
                };
                match header.kind {
                    ContainerType::Data => {}
                    // Device skipped the data phase and answered directly.
                    ContainerType::Response => {
                        return match decode_response(packet) {
                            Ok(response) => self.finish(response),
                            Err(e) => self.fault(e),
                        };
                    }
                    other => {
                        return self.fault(Error::MalformedContainer(format!(
                            "expected data container, got {:?}",
                            other
                        )))
                    }
                }
                active.expected = Some(header.payload_len());
                &packet[HEADER_LEN..]
            }
        };

        let expected = active.expected.unwrap_or(0);
        let take = payload.len().min(expected - active.received);
        active.staging.extend_from_slice(&payload[..take]);
        active.received += take;

        if active.received >= expected || packet.len() < max_packet {
            active.chunk_boundaries(threshold, true);
            self.last_chunks = active.chunks;
            tracing::trace!(tid = %active.tid, bytes = active.received, chunks = active.chunks, "data phase complete");
            self.set_phase(Phase::AwaitResponse)
        } else {
            active.chunk_boundaries(threshold, false);
            self.set_phase(Phase::ReceiveDataChunk)
        }
    }

    fn finish(&mut self, response: Container) -> Poll<Result<Completion>> {
        self.phase = Phase::Idle;
        let Some(active) = self.active.take() else {
            return Poll::Ready(Err(Error::InvalidState));
        };
        if response.transaction_id != active.tid {
            tracing::warn!(
                expected = %active.tid,
                got = %response.transaction_id,
                "response transaction id mismatch"
            );
        }
        let code = response.response_code();
        if code.is_ok() {
            tracing::debug!(code = %active.code, tid = %active.tid, "transaction complete");
            let data = if active.sink.is_some() {
                Vec::new()
            } else {
                active.staging
            };
            Poll::Ready(Ok(Completion { response, data }))
        } else {
            tracing::warn!(code = %active.code, tid = %active.tid, response = %code, "device rejected operation");
            Poll::Ready(Err(Error::Protocol(code)))
        }
    }

    fn fault(&mut self, error: Error) -> Poll<Result<Completion>> {
        let tid = self.active.take().map(|a| a.tid);
        tracing::warn!(?tid, phase = ?self.phase, %error, "transaction faulted");
        self.phase = Phase::Faulted;
        Poll::Ready(Err(error))
    }

    fn set_phase(&mut self, phase: Phase) -> Poll<Result<Completion>> {
        tracing::debug!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
        Poll::Pending
    }
}

impl fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("phase", &self.phase)
            .field("next_tid", &self.next_tid)
            .field("in_flight", &self.active.as_ref().map(|a| a.tid))
            .finish()
    }
}
