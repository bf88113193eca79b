//! Mock USB host with a scripted MTP responder.
//!
//! Provides deterministic, reproducible behavior for tests and bring-up
//! without hardware. The host clock advances by one millisecond on every
//! [`UsbHost::poll`] call, so time-budget behavior is exact.
//!
//! # Example
//!
//! ```
//! use mtp_core::mock::{MockDevice, MockHost};
//! use mtp_core::{MtpDevice, SessionConfig};
//!
//! let mut device = MockDevice::default();
//! device.add_object(0x10, 0x0001_0001, "notes.txt", b"hello".to_vec());
//!
//! let host = MockHost::new(device, 64);
//! let endpoints = host.endpoints();
//! let mut mtp = MtpDevice::claim(host, &endpoints, SessionConfig::default()).unwrap();
//! mtp.wait_ready().unwrap();
//! assert_eq!(mtp.get_object(0x10).unwrap(), b"hello");
//! ```

use crate::codes::{OperationCode, ResponseCode};
use crate::container::{
    encode_data_header, Container, ContainerHeader, ContainerType, EventContainer, Params,
    HEADER_LEN,
};
use crate::error::{Error, Result};
use crate::transport::{
    EndpointDescriptor, MtpEndpoints, PipeId, TransferKind, TransferState, UsbHost,
};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Bulk OUT endpoint address used by [`MockHost`].
pub const BULK_OUT_ADDRESS: u8 = 0x01;
/// Bulk IN endpoint address used by [`MockHost`].
pub const BULK_IN_ADDRESS: u8 = 0x82;
/// Interrupt IN endpoint address used by [`MockHost`].
pub const NOTIFY_ADDRESS: u8 = 0x83;

/// MTP response code for an unknown object property.
pub const INVALID_OBJECT_PROP_CODE: ResponseCode = ResponseCode(0xA801);

/// An object stored on the mock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockObject {
    /// Storage holding the object.
    pub storage_id: u32,
    /// Parent handle, 0 for the storage root.
    pub parent: u32,
    /// Object format code.
    pub format: u16,
    /// File name.
    pub name: String,
    /// Contents.
    pub data: Vec<u8>,
}

/// A storage unit on the mock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockStorage {
    /// Storage id.
    pub id: u32,
    /// Description string.
    pub description: String,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Free bytes.
    pub free: u64,
}

struct IncomingData {
    operation: Container,
    expected: Option<usize>,
    payload: Vec<u8>,
}

/// Scripted MTP responder.
///
/// Answers the standard operations from an in-memory object table. It does
/// not enforce session state.
pub struct MockDevice {
    /// Manufacturer string.
    pub manufacturer: String,
    /// Model string.
    pub model: String,
    /// Serial number.
    pub serial_number: String,
    /// Battery level reported for device property 0x5001.
    pub battery_level: u8,
    storages: Vec<MockStorage>,
    objects: BTreeMap<u32, MockObject>,
    session: Option<u32>,
    operations: Vec<Container>,
    failures: HashMap<u16, ResponseCode>,
    hold_responses: bool,
    incoming: Option<IncomingData>,
    last_object: Option<Vec<u8>>,
    outbox: VecDeque<Vec<u8>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        MockDevice {
            manufacturer: "Acme".into(),
            model: "MockPhone".into(),
            serial_number: "0001".into(),
            battery_level: 80,
            storages: vec![MockStorage {
                id: 0x0001_0001,
                description: "Internal storage".into(),
                capacity: 32 * 1024 * 1024 * 1024,
                free: 8 * 1024 * 1024 * 1024,
            }],
            objects: BTreeMap::new(),
            session: None,
            operations: Vec::new(),
            failures: HashMap::new(),
            hold_responses: false,
            incoming: None,
            last_object: None,
            outbox: VecDeque::new(),
        }
    }
}

impl MockDevice {
    /// Replace the storage list.
    pub fn set_storages(&mut self, storages: Vec<MockStorage>) {
        self.storages = storages;
    }

    /// Add a file at the root of `storage_id`.
    pub fn add_object(&mut self, handle: u32, storage_id: u32, name: &str, data: Vec<u8>) {
        self.objects.insert(
            handle,
            MockObject {
                storage_id,
                parent: 0,
                format: 0x3000,
                name: name.into(),
                data,
            },
        );
    }

    /// Add an object with full control over its metadata.
    pub fn insert_object(&mut self, handle: u32, object: MockObject) {
        self.objects.insert(handle, object);
    }

    /// Whether `handle` exists.
    pub fn has_object(&self, handle: u32) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Answer the next `code` operation with `response` and no data phase.
    pub fn fail_next(&mut self, code: OperationCode, response: ResponseCode) {
        self.failures.insert(code.0, response);
    }

    /// Stop answering operations (nothing is queued on bulk IN).
    pub fn hold_responses(&mut self, hold: bool) {
        self.hold_responses = hold;
    }

    /// Operation containers received, in order.
    pub fn operations(&self) -> &[Container] {
        &self.operations
    }

    /// Open session id, if any.
    pub fn session(&self) -> Option<u32> {
        self.session
    }

    /// Payload of the last SendObject.
    pub fn last_received_object(&self) -> Option<&[u8]> {
        self.last_object.as_deref()
    }

    fn next_in_packet(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    fn clear_outbox(&mut self) {
        self.outbox.clear();
        self.incoming = None;
    }

    fn on_bulk_out(&mut self, bytes: &[u8], max_packet: usize) {
        if let Some(mut incoming) = self.incoming.take() {
            let body = match incoming.expected {
                Some(_) => bytes,
                None => match ContainerHeader::parse(bytes) {
                    Ok(header) if header.kind == ContainerType::Data => {
                        incoming.expected = Some(header.payload_len());
                        &bytes[HEADER_LEN..]
                    }
                    _ => {
                        self.respond(&incoming.operation, ResponseCode::GENERAL_ERROR, &[]);
                        return;
                    }
                },
            };
            incoming.payload.extend_from_slice(body);
            if incoming.payload.len() >= incoming.expected.unwrap_or(0) {
                self.on_data_received(incoming);
            } else {
                self.incoming = Some(incoming);
            }
            return;
        }

        let Ok(op) = Container::parse(bytes) else {
            return;
        };
        self.operations.push(op);

        if op.operation_code() == OperationCode::SEND_OBJECT {
            self.incoming = Some(IncomingData {
                operation: op,
                expected: None,
                payload: Vec::new(),
            });
            return;
        }
        if let Some(code) = self.failures.remove(&op.code) {
            self.respond(&op, code, &[]);
            return;
        }
        self.dispatch(&op, max_packet);
    }

    fn on_data_received(&mut self, incoming: IncomingData) {
        let op = incoming.operation;
        if let Some(code) = self.failures.remove(&op.code) {
            self.respond(&op, code, &[]);
            return;
        }
        self.last_object = Some(incoming.payload);
        self.respond(&op, ResponseCode::OK, &[]);
    }

    fn dispatch(&mut self, op: &Container, max_packet: usize) {
        let p = |i: usize| op.params.get(i).unwrap_or(0);
        match op.operation_code() {
            OperationCode::OPEN_SESSION => {
                if p(0) == 0 {
                    self.respond(op, ResponseCode::INVALID_PARAMETER, &[]);
                } else {
                    self.session = Some(p(0));
                    self.respond(op, ResponseCode::OK, &[]);
                }
            }
            OperationCode::CLOSE_SESSION => {
                self.session = None;
                self.respond(op, ResponseCode::OK, &[]);
            }
            OperationCode::GET_DEVICE_INFO => {
                let data = self.device_info_bytes();
                self.send_data(op, &data, max_packet);
            }
            OperationCode::GET_STORAGE_IDS => {
                let ids: Vec<u32> = self.storages.iter().map(|s| s.id).collect();
                self.send_data(op, &u32_array(&ids), max_packet);
            }
            OperationCode::GET_STORAGE_INFO => {
                match self.storages.iter().find(|s| s.id == p(0)) {
                    Some(storage) => {
                        let data = storage_info_bytes(storage);
                        self.send_data(op, &data, max_packet);
                    }
                    None => self.respond(op, ResponseCode::INVALID_STORAGE_ID, &[]),
                }
            }
            OperationCode::GET_NUM_OBJECTS => {
                let count = self.matching_handles(p(0), p(1), p(2)).len() as u32;
                self.respond(op, ResponseCode::OK, &[count]);
            }
            OperationCode::GET_OBJECT_HANDLES => {
                let handles = self.matching_handles(p(0), p(1), p(2));
                self.send_data(op, &u32_array(&handles), max_packet);
            }
            OperationCode::GET_OBJECT_INFO => match self.objects.get(&p(0)) {
                Some(object) => {
                    let data = object_info_bytes(object);
                    self.send_data(op, &data, max_packet);
                }
                None => self.respond(op, ResponseCode::INVALID_OBJECT_HANDLE, &[]),
            },
            OperationCode::GET_OBJECT => match self.objects.get(&p(0)) {
                Some(object) => {
                    let data = object.data.clone();
                    self.send_data(op, &data, max_packet);
                }
                None => self.respond(op, ResponseCode::INVALID_OBJECT_HANDLE, &[]),
            },
            OperationCode::GET_PARTIAL_OBJECT => match self.objects.get(&p(0)) {
                Some(object) => {
                    let start = (p(1) as usize).min(object.data.len());
                    let end = start.saturating_add(p(2) as usize).min(object.data.len());
                    let slice = object.data[start..end].to_vec();
                    self.send_data_with_params(op, &slice, max_packet, &[slice.len() as u32]);
                }
                None => self.respond(op, ResponseCode::INVALID_OBJECT_HANDLE, &[]),
            },
            OperationCode::DELETE_OBJECT => {
                if self.objects.remove(&p(0)).is_some() {
                    self.respond(op, ResponseCode::OK, &[]);
                } else {
                    self.respond(op, ResponseCode::INVALID_OBJECT_HANDLE, &[]);
                }
            }
            OperationCode::GET_DEVICE_PROP_DESC => {
                if p(0) == 0x5001 {
                    let data = [
                        0x01, 0x50, // BatteryLevel
                        0x02, 0x00, // UINT8
                        0x00,       // get only
                        100,
                        self.battery_level,
                        0x01, // range
                        0, 100, 1,
                    ];
                    self.send_data(op, &data, max_packet);
                } else {
                    self.respond(op, ResponseCode::DEVICE_PROP_NOT_SUPPORTED, &[]);
                }
            }
            OperationCode::GET_OBJECT_PROPS_SUPPORTED => {
                let mut data = 5u32.to_le_bytes().to_vec();
                for code in [0xDC01u16, 0xDC02, 0xDC04, 0xDC07, 0xDC0B] {
                    data.extend_from_slice(&code.to_le_bytes());
                }
                self.send_data(op, &data, max_packet);
            }
            OperationCode::GET_OBJECT_PROP_DESC => match object_prop_desc_bytes(p(0) as u16) {
                Some(data) => self.send_data(op, &data, max_packet),
                None => self.respond(op, INVALID_OBJECT_PROP_CODE, &[]),
            },
            OperationCode::GET_OBJ_PROP_LIST => match self.objects.get(&p(0)) {
                Some(object) => {
                    let data = object_prop_list_bytes(p(0), object);
                    self.send_data(op, &data, max_packet);
                }
                None => self.respond(op, ResponseCode::INVALID_OBJECT_HANDLE, &[]),
            },
            _ => self.respond(op, ResponseCode::OPERATION_NOT_SUPPORTED, &[]),
        }
    }

    /// Handles in `storage` (0xFFFFFFFF = all) of `format` (0 = all) under
    /// `parent` (0 = any depth, 0xFFFFFFFF = root).
    fn matching_handles(&self, storage: u32, format: u32, parent: u32) -> Vec<u32> {
        self.objects
            .iter()
            .filter(|(_, o)| storage == 0xFFFF_FFFF || o.storage_id == storage)
            .filter(|(_, o)| format == 0 || o.format as u32 == format)
            .filter(|(_, o)| match parent {
                0 => true,
                0xFFFF_FFFF => o.parent == 0,
                handle => o.parent == handle,
            })
            .map(|(h, _)| *h)
            .collect()
    }

    fn send_data(&mut self, op: &Container, payload: &[u8], max_packet: usize) {
        self.send_data_with_params(op, payload, max_packet, &[]);
    }

    fn send_data_with_params(
        &mut self,
        op: &Container,
        payload: &[u8],
        max_packet: usize,
        params: &[u32],
    ) {
        if self.hold_responses {
            return;
        }
        let mut container = encode_data_header(op.operation_code(), op.transaction_id, payload.len())
            .to_vec();
        container.extend_from_slice(payload);
        for packet in container.chunks(max_packet.max(1)) {
            self.outbox.push_back(packet.to_vec());
        }
        if container.len() % max_packet.max(1) == 0 {
            self.outbox.push_back(Vec::new());
        }
        self.respond(op, ResponseCode::OK, params);
    }

    fn respond(&mut self, op: &Container, code: ResponseCode, params: &[u32]) {
        if self.hold_responses {
            return;
        }
        let params = Params::from_slice(params).unwrap_or_default();
        self.outbox
            .push_back(Container::response(code, op.transaction_id, params).encode());
    }

    fn device_info_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&100u16.to_le_bytes());
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(&100u16.to_le_bytes());
        put_string(&mut out, "microsoft.com: 1.0;");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend(u16_array(&[
            0x1001, 0x1002, 0x1003, 0x1004, 0x1005, 0x1006, 0x1007, 0x1008, 0x1009, 0x100B,
            0x100D, 0x1014, 0x101B, 0x9801, 0x9802, 0x9805,
        ]));
        out.extend(u16_array(&[0x4002, 0x4003, 0x400C]));
        out.extend(u16_array(&[0x5001]));
        out.extend(u16_array(&[]));
        out.extend(u16_array(&[0x3000, 0x3001, 0x3801]));
        put_string(&mut out, &self.manufacturer);
        put_string(&mut out, &self.model);
        put_string(&mut out, "1.0");
        put_string(&mut out, &self.serial_number);
        out
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    if units.is_empty() {
        out.push(0);
        return;
    }
    out.push((units.len() + 1) as u8);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
}

fn u16_array(values: &[u16]) -> Vec<u8> {
    let mut out = (values.len() as u32).to_le_bytes().to_vec();
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn u32_array(values: &[u32]) -> Vec<u8> {
    let mut out = (values.len() as u32).to_le_bytes().to_vec();
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn storage_info_bytes(storage: &MockStorage) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&3u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&storage.capacity.to_le_bytes());
    out.extend_from_slice(&storage.free.to_le_bytes());
    out.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    put_string(&mut out, &storage.description);
    put_string(&mut out, "");
    out
}

fn object_info_bytes(object: &MockObject) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&object.storage_id.to_le_bytes());
    out.extend_from_slice(&object.format.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(object.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    for _ in 0..7 {
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    out.extend_from_slice(&object.parent.to_le_bytes());
    let association: u16 = if object.format == 0x3001 { 1 } else { 0 };
    out.extend_from_slice(&association.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    put_string(&mut out, &object.name);
    put_string(&mut out, "20240101T000000");
    put_string(&mut out, "20240101T000000");
    put_string(&mut out, "");
    out
}

fn object_prop_desc_bytes(code: u16) -> Option<Vec<u8>> {
    let mut out = code.to_le_bytes().to_vec();
    match code {
        // ObjectFileName: string, read/write
        0xDC07 => {
            out.extend_from_slice(&0xFFFFu16.to_le_bytes());
            out.push(1);
            out.push(0);
            out.extend_from_slice(&0u32.to_le_bytes());
            out.push(0);
        }
        // ObjectSize: u64, read-only
        0xDC04 => {
            out.extend_from_slice(&0x0008u16.to_le_bytes());
            out.push(0);
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.push(0);
        }
        // ObjectFormat: u16 enumeration
        0xDC02 => {
            out.extend_from_slice(&0x0004u16.to_le_bytes());
            out.push(0);
            out.extend_from_slice(&0x3000u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.push(2);
            out.extend_from_slice(&3u16.to_le_bytes());
            for format in [0x3000u16, 0x3001, 0x3801] {
                out.extend_from_slice(&format.to_le_bytes());
            }
        }
        _ => return None,
    }
    Some(out)
}

fn object_prop_list_bytes(handle: u32, object: &MockObject) -> Vec<u8> {
    let mut out = 4u32.to_le_bytes().to_vec();
    let mut element = |code: u16, dtype: u16, value: &[u8]| {
        out.extend_from_slice(&handle.to_le_bytes());
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&dtype.to_le_bytes());
        out.extend_from_slice(value);
    };
    element(0xDC01, 0x0006, &object.storage_id.to_le_bytes());
    let mut name = Vec::new();
    put_string(&mut name, &object.name);
    element(0xDC07, 0xFFFF, &name);
    element(0xDC04, 0x0008, &(object.data.len() as u64).to_le_bytes());
    element(0xDC0B, 0x0006, &object.parent.to_le_bytes());
    out
}

enum PendingTransfer {
    Out(Vec<u8>),
    In(usize),
}

struct MockPipe {
    endpoint: EndpointDescriptor,
    pending: Option<PendingTransfer>,
    state: TransferState,
    received: Vec<u8>,
    transferred: usize,
}

/// [`UsbHost`] backed by a [`MockDevice`].
pub struct MockHost {
    device: MockDevice,
    max_packet: usize,
    notify_interval: u8,
    clock: u64,
    connected: bool,
    next_pipe: u8,
    pipes: BTreeMap<PipeId, MockPipe>,
    retries: usize,
    stall: bool,
    submissions: usize,
    events: VecDeque<Vec<u8>>,
}

impl MockHost {
    /// Host whose bulk endpoints have `max_packet` byte packets.
    pub fn new(device: MockDevice, max_packet: usize) -> Self {
        MockHost {
            device,
            max_packet: max_packet.max(1),
            notify_interval: 4,
            clock: 0,
            connected: true,
            next_pipe: 1,
            pipes: BTreeMap::new(),
            retries: 0,
            stall: false,
            submissions: 0,
            events: VecDeque::new(),
        }
    }

    /// Set the interrupt endpoint's bInterval.
    pub fn with_notify_interval(mut self, interval: u8) -> Self {
        self.notify_interval = interval;
        self
    }

    /// Endpoint descriptors of the mock interface.
    pub fn endpoints(&self) -> MtpEndpoints {
        MtpEndpoints {
            notify: EndpointDescriptor {
                address: NOTIFY_ADDRESS,
                kind: TransferKind::Interrupt,
                max_packet: 64,
                interval: self.notify_interval,
            },
            bulk_in: EndpointDescriptor {
                address: BULK_IN_ADDRESS,
                kind: TransferKind::Bulk,
                max_packet: self.max_packet as u16,
                interval: 0,
            },
            bulk_out: EndpointDescriptor {
                address: BULK_OUT_ADDRESS,
                kind: TransferKind::Bulk,
                max_packet: self.max_packet as u16,
                interval: 0,
            },
        }
    }

    /// The responder.
    pub fn device(&self) -> &MockDevice {
        &self.device
    }

    /// The responder, mutably.
    pub fn device_mut(&mut self) -> &mut MockDevice {
        &mut self.device
    }

    /// Turn the next `n` completions into [`TransferState::Retry`].
    pub fn inject_retries(&mut self, n: usize) {
        self.retries = n;
    }

    /// Stall the next polled transfer.
    pub fn inject_stall(&mut self) {
        self.stall = true;
    }

    /// Clear a halt: drop queued device output and in-flight transfers.
    pub fn clear_halt(&mut self) {
        self.device.clear_outbox();
        for pipe in self.pipes.values_mut() {
            pipe.pending = None;
            pipe.state = TransferState::Pending;
        }
    }

    /// Simulate device removal.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Queue an event on the interrupt endpoint.
    pub fn push_event(&mut self, event: EventContainer) {
        self.events.push_back(event.encode());
    }

    /// Move the clock forward.
    pub fn advance_clock(&mut self, ms: u64) {
        self.clock += ms;
    }

    /// Transfers submitted so far.
    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// Pipes currently open.
    pub fn open_pipe_count(&self) -> usize {
        self.pipes.len()
    }

    fn pipe_mut(&mut self, pipe: PipeId) -> Result<&mut MockPipe> {
        self.pipes
            .get_mut(&pipe)
            .ok_or_else(|| Error::Submit(format!("unknown pipe {:?}", pipe)))
    }
}

impl UsbHost for MockHost {
    fn open_pipe(&mut self, endpoint: &EndpointDescriptor) -> Result<PipeId> {
        if !self.connected {
            return Err(Error::Submit("device not connected".into()));
        }
        let id = PipeId(self.next_pipe);
        self.next_pipe = self.next_pipe.wrapping_add(1);
        self.pipes.insert(
            id,
            MockPipe {
                endpoint: *endpoint,
                pending: None,
                state: TransferState::Pending,
                received: Vec::new(),
                transferred: 0,
            },
        );
        Ok(id)
    }

    fn close_pipe(&mut self, pipe: PipeId) {
        self.pipes.remove(&pipe);
    }

    fn submit_send(&mut self, pipe: PipeId, data: &[u8]) -> Result<()> {
        self.submissions += 1;
        let p = self.pipe_mut(pipe)?;
        p.pending = Some(PendingTransfer::Out(data.to_vec()));
        p.state = TransferState::Pending;
        Ok(())
    }

    fn submit_receive(&mut self, pipe: PipeId, max_len: usize) -> Result<()> {
        self.submissions += 1;
        let p = self.pipe_mut(pipe)?;
        p.pending = Some(PendingTransfer::In(max_len));
        p.state = TransferState::Pending;
        Ok(())
    }

    fn poll(&mut self, pipe: PipeId) -> TransferState {
        self.clock += 1;
        if !self.connected {
            return TransferState::Pending;
        }
        let max_packet = self.max_packet;
        let Some(p) = self.pipes.get_mut(&pipe) else {
            return TransferState::Pending;
        };
        let Some(pending) = p.pending.take() else {
            return p.state;
        };

        if self.stall {
            self.stall = false;
            p.state = TransferState::Stalled;
            return p.state;
        }

        match pending {
            PendingTransfer::Out(bytes) => {
                if self.retries > 0 {
                    self.retries -= 1;
                    p.state = TransferState::Retry;
                    return p.state;
                }
                p.transferred = bytes.len();
                p.state = TransferState::Done;
                self.device.on_bulk_out(&bytes, max_packet);
                TransferState::Done
            }
            PendingTransfer::In(max_len) => {
                let packet = if p.endpoint.address == NOTIFY_ADDRESS {
                    self.events.pop_front()
                } else if self.retries > 0 && !self.device.outbox.is_empty() {
                    self.retries -= 1;
                    p.state = TransferState::Retry;
                    return p.state;
                } else {
                    self.device.next_in_packet()
                };
                match packet {
                    Some(mut packet) => {
                        packet.truncate(max_len);
                        p.transferred = packet.len();
                        p.received = packet;
                        p.state = TransferState::Done;
                    }
                    None => {
                        p.pending = Some(PendingTransfer::In(max_len));
                        p.state = TransferState::Pending;
                    }
                }
                p.state
            }
        }
    }

    fn bytes_transferred(&self, pipe: PipeId) -> usize {
        self.pipes.get(&pipe).map_or(0, |p| p.transferred)
    }

    fn received(&self, pipe: PipeId) -> &[u8] {
        self.pipes
            .get(&pipe)
            .map(|p| p.received.as_slice())
            .unwrap_or(&[])
    }

    fn now_ms(&self) -> u64 {
        self.clock
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
