//! Container and field wire-format conformance tests.
//!
//! Fixtures are the exact bytes a PTP/MTP device puts on the bulk and
//! interrupt pipes (ISO 15740 §9.3, MTP 1.1 §D).

use mtp_core::container::{
    decode_response, encode_data_header, encode_operation, ContainerHeader, ContainerType,
    HEADER_LEN,
};
use mtp_core::dataset::{parse_object_prop_list, ObjectInfo};
use mtp_core::decode::{array_read, fixed_width_read, property_value_read, string_read};
use mtp_core::{
    Container, Error, EventCode, EventContainer, OperationCode, Params, PropertyValue,
    ResponseCode, StringDecoding, TransactionId,
};

fn bytes(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

/// OpenSession(1) as the first transaction of a session.
#[test]
fn test_open_session_operation_bytes() {
    let encoded = encode_operation(
        OperationCode::OPEN_SESSION,
        TransactionId(1),
        &Params::from_slice(&[1]).unwrap(),
    );
    assert_eq!(encoded, bytes("10000000010002100100000001000000"));
}

/// GetObjectHandles(storage, all formats, root).
#[test]
fn test_get_object_handles_operation_bytes() {
    let params = Params::from_slice(&[0x0001_0001, 0, 0xFFFF_FFFF]).unwrap();
    let encoded = encode_operation(OperationCode::GET_OBJECT_HANDLES, TransactionId(5), &params);
    assert_eq!(
        encoded,
        bytes("1800000001000710050000000100010000000000ffffffff")
    );

    let header = ContainerHeader::parse(&encoded).unwrap();
    assert_eq!(header.length, 24);
    assert_eq!(header.kind, ContainerType::Operation);
    assert_eq!(header.payload_len(), 12);
}

/// Container length is 12 + 4 bytes per parameter for 0 through 5 parameters.
#[test]
fn test_operation_length_per_param_count() {
    let all = [0x11, 0x22, 0x33, 0x44, 0x55];
    for n in 0..=5 {
        let params = Params::from_slice(&all[..n]).unwrap();
        let encoded = encode_operation(OperationCode::GET_OBJECT_INFO, TransactionId(3), &params);
        assert_eq!(encoded.len(), HEADER_LEN + 4 * n);
        assert_eq!(
            u32::from_le_bytes(encoded[0..4].try_into().unwrap()) as usize,
            encoded.len()
        );

        let parsed = Container::parse(&encoded).unwrap();
        assert_eq!(parsed.params.as_slice(), &all[..n]);
        assert_eq!(parsed.operation_code(), OperationCode::GET_OBJECT_INFO);
    }
}

#[test]
fn test_more_than_five_params_rejected() {
    assert_eq!(
        Params::from_slice(&[0; 6]),
        Err(Error::TooManyParams(6))
    );
}

#[test]
fn test_response_ok_without_params() {
    let response = decode_response(&bytes("0c0000000300012001000000")).unwrap();
    assert_eq!(response.response_code(), ResponseCode::OK);
    assert_eq!(response.transaction_id, TransactionId(1));
    assert!(response.params.is_empty());
}

#[test]
fn test_response_with_param() {
    let response = decode_response(&bytes("10000000030001200700000003000000")).unwrap();
    assert_eq!(response.params.get(0), Some(3));
    assert_eq!(response.params.get(1), None);

    let encoded = Container::response(
        ResponseCode::OK,
        TransactionId(7),
        Params::from_slice(&[3]).unwrap(),
    )
    .encode();
    assert_eq!(encoded, bytes("10000000030001200700000003000000"));
}

#[test]
fn test_response_error_code() {
    // InvalidObjectHandle
    let response = decode_response(&bytes("0c0000000300092002000000")).unwrap();
    assert_eq!(response.response_code(), ResponseCode::INVALID_OBJECT_HANDLE);
    assert!(!response.response_code().is_ok());
}

#[test]
fn test_trailing_bytes_ignored() {
    let mut wire = bytes("0c0000000300012001000000");
    wire.extend_from_slice(&[0xEE; 8]);
    let response = decode_response(&wire).unwrap();
    assert!(response.params.is_empty());
}

#[test]
fn test_malformed_containers() {
    // Shorter than a header.
    assert!(matches!(
        Container::parse(&[0x0C, 0, 0, 0, 3, 0, 1, 0x20, 1, 0, 0]),
        Err(Error::BufferTooShort { .. })
    ));
    // Declared length beyond the received bytes.
    assert!(matches!(
        Container::parse(&bytes("100000000300012001000000")),
        Err(Error::MalformedContainer(_))
    ));
    // Unknown container type 7.
    assert!(matches!(
        Container::parse(&bytes("0c0000000700012001000000")),
        Err(Error::MalformedContainer(_))
    ));
    // Six parameters do not fit an operation or response.
    let mut six = bytes("240000000300012001000000");
    six.extend_from_slice(&[0; 24]);
    assert!(matches!(
        Container::parse(&six),
        Err(Error::MalformedContainer(_))
    ));
    // A parameter block that is not a whole number of u32s.
    assert!(matches!(
        Container::parse(&bytes("0e00000003000120010000000000")),
        Err(Error::MalformedContainer(_))
    ));
    // An operation is not a response.
    assert!(matches!(
        decode_response(&bytes("0c0000000100011001000000")),
        Err(Error::MalformedContainer(_))
    ));
}

#[test]
fn test_data_header_bytes() {
    let header = encode_data_header(OperationCode::SEND_OBJECT, TransactionId(9), 300);
    assert_eq!(header.to_vec(), bytes("3801000002000d1009000000"));

    let parsed = ContainerHeader::parse(&header).unwrap();
    assert_eq!(parsed.kind, ContainerType::Data);
    assert_eq!(parsed.payload_len(), 300);
}

#[test]
fn test_event_layout() {
    let event = EventContainer {
        code: EventCode::OBJECT_ADDED,
        transaction_id: TransactionId(0),
        params: [0x31, 0, 0],
    };
    let wire = bytes("180000000400024000000000310000000000000000000000");
    assert_eq!(event.encode(), wire);
    assert_eq!(EventContainer::parse(&wire).unwrap(), event);
}

#[test]
fn test_short_event_zero_fills_params() {
    // StoreAdded with a single parameter.
    let event = EventContainer::parse(&bytes("10000000040004400000000001000100")).unwrap();
    assert_eq!(event.code, EventCode::STORE_ADDED);
    assert_eq!(event.params, [0x0001_0001, 0, 0]);
    assert_eq!(event.param1(), 0x0001_0001);
}

#[test]
fn test_event_parse_rejects_other_kinds() {
    assert!(matches!(
        EventContainer::parse(&bytes("0c0000000300012001000000")),
        Err(Error::MalformedContainer(_))
    ));
}

#[test]
fn test_string_without_terminator() {
    let wire = bytes("03410042004300");
    let (text, used) = string_read(&wire, 0, StringDecoding::Narrow).unwrap();
    assert_eq!(text, "ABC");
    assert_eq!(used, 7);
}

#[test]
fn test_string_with_terminator_and_offset() {
    let mut wire = vec![0xAA, 0xBB];
    wire.extend_from_slice(&bytes("044100420043000000"));
    let (text, used) = string_read(&wire, 2, StringDecoding::Narrow).unwrap();
    assert_eq!(text, "ABC");
    assert_eq!(used, 9);
}

#[test]
fn test_empty_string_consumes_count_byte() {
    assert_eq!(
        string_read(&[0], 0, StringDecoding::Narrow).unwrap(),
        (String::new(), 1)
    );
}

#[test]
fn test_string_decoding_modes() {
    // U+03A9 GREEK CAPITAL LETTER OMEGA, NUL terminated.
    let wire = bytes("02a9030000");
    let (narrow, used) = string_read(&wire, 0, StringDecoding::Narrow).unwrap();
    assert_eq!(narrow, "\u{a9}");
    assert_eq!(used, 5);
    let (wide, _) = string_read(&wire, 0, StringDecoding::Utf16).unwrap();
    assert_eq!(wide, "\u{3a9}");
}

#[test]
fn test_truncated_string() {
    assert!(matches!(
        string_read(&bytes("054100"), 0, StringDecoding::Narrow),
        Err(Error::BufferTooShort { .. })
    ));
}

#[test]
fn test_u32_array() {
    let wire = bytes("020000000100000002000000");
    let (values, used) = array_read(&wire, 0, 4).unwrap();
    assert_eq!(values, vec![1, 2]);
    assert_eq!(used, 12);
}

#[test]
fn test_u16_array_reads_full_values() {
    let wire = bytes("03000000011002100710");
    let (values, used) = array_read(&wire, 0, 2).unwrap();
    assert_eq!(values, vec![0x1001, 0x1002, 0x1007]);
    assert_eq!(used, 10);
}

#[test]
fn test_array_errors() {
    assert_eq!(array_read(&[0; 8], 0, 3), Err(Error::UnsupportedWidth(3)));
    // Count says 4 elements, only one present.
    assert!(matches!(
        array_read(&bytes("0400000001000000"), 0, 4),
        Err(Error::BufferTooShort { .. })
    ));
}

#[test]
fn test_fixed_width_sign_extension() {
    let wire = [0xFE, 0xFF];
    assert_eq!(fixed_width_read(&wire, 0, 2, true).unwrap(), (-2, 2));
    assert_eq!(fixed_width_read(&wire, 0, 2, false).unwrap(), (0xFFFE, 2));
    assert_eq!(fixed_width_read(&wire, 0, 16, false), Err(Error::UnsupportedWidth(16)));
}

#[test]
fn test_property_values_by_declared_type() {
    let (value, used) = property_value_read(&[0x50], 0, 0x0002, StringDecoding::Narrow).unwrap();
    assert_eq!((value, used), (PropertyValue::UInt8(0x50), 1));

    let (value, used) =
        property_value_read(&bytes("0200000034120000"), 0, 0x4004, StringDecoding::Narrow)
            .unwrap();
    assert_eq!(
        value,
        PropertyValue::Array(vec![PropertyValue::UInt16(0x1234), PropertyValue::UInt16(0)])
    );
    assert_eq!(used, 8);

    assert_eq!(
        property_value_read(&[0; 4], 0, 0x0BAD, StringDecoding::Narrow),
        Err(Error::UnknownDataType(0x0BAD))
    );
}

#[test]
fn test_object_prop_list_payload() {
    // One element: handle 7, ObjectFileName, string "a".
    let wire = bytes("010000000700000007dcffff0261000000");
    let props = parse_object_prop_list(&wire, StringDecoding::Narrow).unwrap();
    assert_eq!(props.len(), 1);
    assert_eq!(props[0].handle, 7);
    assert_eq!(props[0].property_code, 0xDC07);
    assert_eq!(props[0].value.as_str(), Some("a"));
}

fn object_info(wide_size: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0001u32.to_le_bytes());
    out.extend_from_slice(&0x3000u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    if wide_size {
        out.extend_from_slice(&0x1_0000_0010u64.to_le_bytes());
    } else {
        out.extend_from_slice(&0x10u32.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    // Thumbnail and image geometry, then parent.
    out.extend_from_slice(&[0; 28]);
    out.extend_from_slice(&0u16.to_le_bytes());
    // Association description and sequence number.
    out.extend_from_slice(&[0; 8]);
    // "f.bin"
    out.extend_from_slice(&bytes("0666002e00620069006e000000"));
    out
}

#[test]
fn test_object_info_standard_and_wide_size() {
    let standard = object_info(false);
    assert_eq!(standard[52], 6);
    let info = ObjectInfo::parse(&standard, StringDecoding::Narrow).unwrap();
    assert_eq!(info.compressed_size, 0x10);
    assert_eq!(info.filename, "f.bin");

    let wide = object_info(true);
    assert_eq!(wide[52], 0);
    assert_eq!(wide[56], 6);
    let info = ObjectInfo::parse(&wide, StringDecoding::Narrow).unwrap();
    assert_eq!(info.compressed_size, 0x1_0000_0010);
    assert_eq!(info.filename, "f.bin");
    assert_eq!(info.storage_id, 0x0001_0001);
}
