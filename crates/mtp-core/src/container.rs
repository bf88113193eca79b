//! PTP container codec.
//!
//! Every PTP message on the bulk and interrupt pipes is a container:
//!
//! ```text
//! ┌──────────────┬────────────┬────────────┬──────────────────┬───────────────┐
//! │ length: u32  │ type: u16  │ code: u16  │ transaction: u32 │ payload       │
//! └──────────────┴────────────┴────────────┴──────────────────┴───────────────┘
//!   includes the    1 operation   opcode,      assigned per      ≤5 × u32 params
//!   12-byte header  2 data        response or  operation         (operation,
//!                   3 response    event code                     response),
//!                   4 event                                      ≤3 × u32 (event),
//!                                                                raw bytes (data)
//! ```
//!
//! All fields are little-endian.

use crate::codes::{EventCode, OperationCode, ResponseCode};
use crate::decode::{check_len, read_u16_le, read_u32_le};
use crate::error::{Error, Result};
use core::fmt;

/// Size of the fixed container header.
pub const HEADER_LEN: usize = 12;

/// Maximum parameters in an Operation or Response container.
pub const MAX_PARAMS: usize = 5;

/// Maximum parameters in an Event container.
pub const EVENT_MAX_PARAMS: usize = 3;

/// Container type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContainerType {
    /// Operation request (host → device).
    Operation = 1,
    /// Data phase payload (either direction).
    Data = 2,
    /// Response (device → host).
    Response = 3,
    /// Asynchronous event (interrupt pipe).
    Event = 4,
}

impl ContainerType {
    /// Parse the wire value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ContainerType::Operation),
            2 => Some(ContainerType::Data),
            3 => Some(ContainerType::Response),
            4 => Some(ContainerType::Event),
            _ => None,
        }
    }

    /// Wire value.
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Per-operation sequence number scoped to one open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransactionId(pub u32);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid#{}", self.0)
    }
}

/// Up to five `u32` container parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Params {
    values: [u32; MAX_PARAMS],
    len: usize,
}

impl Params {
    /// No parameters.
    pub const fn none() -> Self {
        Params {
            values: [0; MAX_PARAMS],
            len: 0,
        }
    }

    /// Build from a slice of at most [`MAX_PARAMS`] values.
    pub fn from_slice(values: &[u32]) -> Result<Self> {
        if values.len() > MAX_PARAMS {
            return Err(Error::TooManyParams(values.len()));
        }
        let mut params = Params::none();
        params.values[..values.len()].copy_from_slice(values);
        params.len = values.len();
        Ok(params)
    }

    /// Build from a fixed array the engine knows fits.
    pub(crate) fn from_fixed<const N: usize>(values: [u32; N]) -> Self {
        debug_assert!(N <= MAX_PARAMS);
        let n = N.min(MAX_PARAMS);
        let mut params = Params::none();
        params.values[..n].copy_from_slice(&values[..n]);
        params.len = n;
        params
    }

    /// Parameters as a slice.
    pub fn as_slice(&self) -> &[u32] {
        &self.values[..self.len]
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Parameter `index`, if present.
    pub fn get(&self, index: usize) -> Option<u32> {
        self.as_slice().get(index).copied()
    }
}

/// Decoded 12-byte container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Total container length including the header.
    pub length: u32,
    /// Container type.
    pub kind: ContainerType,
    /// Operation, response or event code.
    pub code: u16,
    /// Transaction the container belongs to.
    pub transaction_id: TransactionId,
}

impl ContainerHeader {
    /// Decode the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, HEADER_LEN)?;
        let length = read_u32_le(&bytes[0..4]);
        let raw_kind = read_u16_le(&bytes[4..6]);
        let kind = ContainerType::from_u16(raw_kind).ok_or_else(|| {
            Error::MalformedContainer(format!("unknown container type {}", raw_kind))
        })?;
        if (length as usize) < HEADER_LEN {
            return Err(Error::MalformedContainer(format!(
                "length {} shorter than header",
                length
            )));
        }
        Ok(ContainerHeader {
            length,
            kind,
            code: read_u16_le(&bytes[6..8]),
            transaction_id: TransactionId(read_u32_le(&bytes[8..12])),
        })
    }

    /// Bytes following the header.
    pub fn payload_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }

    /// Serialize.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..6].copy_from_slice(&self.kind.to_u16().to_le_bytes());
        out[6..8].copy_from_slice(&self.code.to_le_bytes());
        out[8..12].copy_from_slice(&self.transaction_id.0.to_le_bytes());
        out
    }
}

/// Operation or Response container with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Container {
    /// Container type.
    pub kind: ContainerType,
    /// Operation or response code.
    pub code: u16,
    /// Transaction id.
    pub transaction_id: TransactionId,
    /// Parameters.
    pub params: Params,
}

impl Container {
    /// Operation container.
    pub fn operation(code: OperationCode, transaction_id: TransactionId, params: Params) -> Self {
        Container {
            kind: ContainerType::Operation,
            code: code.0,
            transaction_id,
            params,
        }
    }

    /// Response container.
    pub fn response(code: ResponseCode, transaction_id: TransactionId, params: Params) -> Self {
        Container {
            kind: ContainerType::Response,
            code: code.0,
            transaction_id,
            params,
        }
    }

    /// Response code, interpreting `code` as one.
    pub fn response_code(&self) -> ResponseCode {
        ResponseCode(self.code)
    }

    /// Operation code, interpreting `code` as one.
    pub fn operation_code(&self) -> OperationCode {
        OperationCode(self.code)
    }

    /// Serialize header and parameters.
    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_LEN + 4 * self.params.len();
        let header = ContainerHeader {
            length: length as u32,
            kind: self.kind,
            code: self.code,
            transaction_id: self.transaction_id,
        };
        let mut out = Vec::with_capacity(length);
        out.extend_from_slice(&header.to_bytes());
        for param in self.params.as_slice() {
            out.extend_from_slice(&param.to_le_bytes());
        }
        out
    }

    /// Parse an Operation, Response or Event container.
    ///
    /// Trailing bytes beyond the declared length are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = ContainerHeader::parse(bytes)?;
        if header.kind == ContainerType::Data {
            return Err(Error::MalformedContainer(
                "data container has no parameters".into(),
            ));
        }
        let length = header.length as usize;
        if length > bytes.len() {
            return Err(Error::MalformedContainer(format!(
                "declared length {} exceeds {} received bytes",
                length,
                bytes.len()
            )));
        }
        let body = length - HEADER_LEN;
        if body % 4 != 0 || body / 4 > MAX_PARAMS {
            return Err(Error::MalformedContainer(format!(
                "parameter block of {} bytes",
                body
            )));
        }
        let mut params = Params::none();
        for (i, chunk) in bytes[HEADER_LEN..length].chunks_exact(4).enumerate() {
            params.values[i] = read_u32_le(chunk);
        }
        params.len = body / 4;
        Ok(Container {
            kind: header.kind,
            code: header.code,
            transaction_id: header.transaction_id,
            params,
        })
    }
}

/// Encode an Operation container: `length = 12 + 4·params.len()`.
pub fn encode_operation(
    code: OperationCode,
    transaction_id: TransactionId,
    params: &Params,
) -> Vec<u8> {
    Container::operation(code, transaction_id, *params).encode()
}

/// Decode a Response container.
pub fn decode_response(bytes: &[u8]) -> Result<Container> {
    let container = Container::parse(bytes)?;
    if container.kind != ContainerType::Response {
        return Err(Error::MalformedContainer(format!(
            "expected response container, got {:?}",
            container.kind
        )));
    }
    Ok(container)
}

/// Header of an outgoing Data container carrying `payload_len` bytes.
pub fn encode_data_header(
    code: OperationCode,
    transaction_id: TransactionId,
    payload_len: usize,
) -> [u8; HEADER_LEN] {
    ContainerHeader {
        length: (HEADER_LEN + payload_len) as u32,
        kind: ContainerType::Data,
        code: code.0,
        transaction_id,
    }
    .to_bytes()
}

/// Event container received on the interrupt pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContainer {
    /// Event code.
    pub code: EventCode,
    /// Transaction id the event refers to, if any.
    pub transaction_id: TransactionId,
    /// Parameters; absent ones decode as 0.
    pub params: [u32; EVENT_MAX_PARAMS],
}

impl EventContainer {
    /// Decode an event container.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = ContainerHeader::parse(bytes)?;
        if header.kind != ContainerType::Event {
            return Err(Error::MalformedContainer(format!(
                "expected event container, got {:?}",
                header.kind
            )));
        }
        let end = (header.length as usize).min(bytes.len());
        let mut params = [0u32; EVENT_MAX_PARAMS];
        for (slot, chunk) in params
            .iter_mut()
            .zip(bytes[HEADER_LEN..end].chunks_exact(4))
        {
            *slot = read_u32_le(chunk);
        }
        Ok(EventContainer {
            code: EventCode(header.code),
            transaction_id: header.transaction_id,
            params,
        })
    }

    /// First parameter.
    pub fn param1(&self) -> u32 {
        self.params[0]
    }

    /// Serialize with all three parameters.
    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_LEN + 4 * EVENT_MAX_PARAMS;
        let mut out = Vec::with_capacity(length);
        out.extend_from_slice(
            &ContainerHeader {
                length: length as u32,
                kind: ContainerType::Event,
                code: self.code.0,
                transaction_id: self.transaction_id,
            }
            .to_bytes(),
        );
        for param in &self.params {
            out.extend_from_slice(&param.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_layout() {
        let bytes = encode_operation(
            OperationCode::OPEN_SESSION,
            TransactionId(1),
            &Params::from_fixed([1]),
        );
        assert_eq!(hex::encode(&bytes), "10000000010002100100000001000000");
    }

    #[test]
    fn test_operation_roundtrip_all_param_counts() {
        let all = [0xDEAD_BEEF, 0, 0xFFFF_FFFF, 7, 0x0001_0001];
        for n in 0..=MAX_PARAMS {
            let params = Params::from_slice(&all[..n]).unwrap();
            let bytes = encode_operation(
                OperationCode::GET_OBJECT_HANDLES,
                TransactionId(42 + n as u32),
                &params,
            );
            assert_eq!(bytes.len(), HEADER_LEN + 4 * n);

            let parsed = Container::parse(&bytes).unwrap();
            assert_eq!(parsed.kind, ContainerType::Operation);
            assert_eq!(parsed.operation_code(), OperationCode::GET_OBJECT_HANDLES);
            assert_eq!(parsed.transaction_id, TransactionId(42 + n as u32));
            assert_eq!(parsed.params.as_slice(), &all[..n]);
        }
    }

    #[test]
    fn test_too_many_params_rejected() {
        assert_eq!(
            Params::from_slice(&[1, 2, 3, 4, 5, 6]),
            Err(Error::TooManyParams(6))
        );
    }

    #[test]
    fn test_decode_response_ok_with_param() {
        let bytes = hex::decode("1000000003000120070000002a000000").unwrap();
        let response = decode_response(&bytes).unwrap();
        assert!(response.response_code().is_ok());
        assert_eq!(response.transaction_id, TransactionId(7));
        assert_eq!(response.params.as_slice(), &[42]);
    }

    #[test]
    fn test_decode_response_ignores_padding() {
        let mut bytes = Container::response(ResponseCode::OK, TransactionId(3), Params::none())
            .encode();
        bytes.extend_from_slice(&[0xAA; 20]);
        let response = decode_response(&bytes).unwrap();
        assert!(response.params.is_empty());
    }

    #[test]
    fn test_decode_response_rejects_wrong_kind() {
        let bytes = encode_operation(OperationCode::GET_DEVICE_INFO, TransactionId(1), &Params::none());
        assert!(matches!(
            decode_response(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_truncated_container() {
        assert!(matches!(
            Container::parse(&[0x10, 0, 0, 0, 3, 0]),
            Err(Error::BufferTooShort { needed: 12, available: 6 })
        ));

        // declares 16 bytes, carries 12
        let bytes = hex::decode("100000000300012001000000").unwrap();
        assert!(matches!(
            Container::parse(&bytes),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_data_header() {
        let header = encode_data_header(OperationCode::SEND_OBJECT, TransactionId(9), 500);
        let parsed = ContainerHeader::parse(&header).unwrap();
        assert_eq!(parsed.kind, ContainerType::Data);
        assert_eq!(parsed.length, 512);
        assert_eq!(parsed.payload_len(), 500);
        assert_eq!(parsed.code, OperationCode::SEND_OBJECT.0);
    }

    #[test]
    fn test_event_container() {
        let event = EventContainer {
            code: EventCode::OBJECT_ADDED,
            transaction_id: TransactionId(0),
            params: [0x0000_0123, 0, 0],
        };
        let parsed = EventContainer::parse(&event.encode()).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.param1(), 0x123);

        // short event: only param1 on the wire
        let short = hex::decode("10000000040003400000000077000000").unwrap();
        let parsed = EventContainer::parse(&short).unwrap();
        assert_eq!(parsed.code, EventCode::OBJECT_REMOVED);
        assert_eq!(parsed.params, [0x77, 0, 0]);
    }
}
