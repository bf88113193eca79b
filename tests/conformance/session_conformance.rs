//! End-to-end session conformance against the scripted mock device.
//!
//! Covers session setup order, transaction id assignment, fault handling and
//! multi-packet data phases over a 512-byte high-speed bulk endpoint.

use mtp_core::mock::{MockDevice, MockHost, MockStorage};
use mtp_core::ops::ROOT_PARENT;
use mtp_core::{
    Error, FaultClass, MtpDevice, OperationCode, ResponseCode, SessionConfig, SessionState,
    TransactionId,
};
use rand::RngCore;
use std::sync::{Arc, Mutex};

const STORAGE: u32 = 0x0001_0001;
const HIGH_SPEED: usize = 512;

fn claimed(device: MockDevice, config: SessionConfig) -> MtpDevice<MockHost> {
    let host = MockHost::new(device, HIGH_SPEED);
    let endpoints = host.endpoints();
    MtpDevice::claim(host, &endpoints, config).unwrap()
}

fn ready(device: MockDevice) -> MtpDevice<MockHost> {
    let mut mtp = claimed(device, SessionConfig::default());
    mtp.wait_ready().unwrap();
    mtp
}

fn populated() -> MockDevice {
    let mut device = MockDevice::default();
    device.add_object(1, STORAGE, "IMG_0001.JPG", vec![0xD8; 64]);
    device.add_object(2, STORAGE, "IMG_0002.JPG", vec![0xD9; 96]);
    device
}

fn sent(mtp: &MtpDevice<MockHost>) -> Vec<(OperationCode, u32, Vec<u32>)> {
    mtp.host()
        .device()
        .operations()
        .iter()
        .map(|op| {
            (
                op.operation_code(),
                op.transaction_id.0,
                op.params.as_slice().to_vec(),
            )
        })
        .collect()
}

#[test]
fn test_setup_sequence_then_enumerate() {
    let mut mtp = ready(populated());
    assert_eq!(mtp.state(), SessionState::Ready);
    assert_eq!(
        sent(&mtp),
        vec![
            (OperationCode::OPEN_SESSION, 1, vec![1]),
            (OperationCode::GET_DEVICE_INFO, 2, vec![]),
            (OperationCode::GET_STORAGE_IDS, 3, vec![]),
            (OperationCode::GET_STORAGE_INFO, 4, vec![STORAGE]),
        ]
    );
    assert_eq!(mtp.storage_ids(), &[STORAGE]);
    assert_eq!(mtp.current_storage(), Some(STORAGE));
    assert_eq!(mtp.device_info().unwrap().manufacturer, "Acme");
    assert_eq!(mtp.storage_info(0).unwrap().description, "Internal storage");

    let handles = mtp.get_object_handles(0, 0, ROOT_PARENT).unwrap();
    assert_eq!(handles, vec![1, 2]);
    assert_eq!(
        sent(&mtp).last().unwrap(),
        &(
            OperationCode::GET_OBJECT_HANDLES,
            5,
            vec![STORAGE, 0, 0xFFFF_FFFF]
        )
    );
}

#[test]
fn test_custom_session_id() {
    let mut mtp = claimed(populated(), SessionConfig::default().with_session_id(0x42));
    mtp.wait_ready().unwrap();
    assert_eq!(mtp.host().device().session(), Some(0x42));
    assert_eq!(sent(&mtp)[0], (OperationCode::OPEN_SESSION, 1, vec![0x42]));
}

#[test]
fn test_multiple_storages() {
    let mut device = populated();
    device.set_storages(vec![
        MockStorage {
            id: STORAGE,
            description: "Internal storage".into(),
            capacity: 1 << 30,
            free: 1 << 29,
        },
        MockStorage {
            id: 0x0002_0001,
            description: "SD card".into(),
            capacity: 1 << 34,
            free: 1 << 33,
        },
    ]);
    device.add_object(7, 0x0002_0001, "DSC_0007.NEF", vec![1; 10]);
    let mut mtp = ready(device);

    assert_eq!(mtp.storage_count(), 2);
    assert_eq!(mtp.storage_info(1).unwrap().description, "SD card");
    assert_eq!(mtp.storage_info(1).unwrap().max_capacity, 1 << 34);
    let storage_infos = sent(&mtp)
        .into_iter()
        .filter(|(code, _, _)| *code == OperationCode::GET_STORAGE_INFO)
        .count();
    assert_eq!(storage_infos, 2);

    mtp.select_storage(1).unwrap();
    assert_eq!(mtp.current_storage(), Some(0x0002_0001));
    assert_eq!(mtp.get_object_handles(1, 0, ROOT_PARENT).unwrap(), vec![7]);
    assert_eq!(mtp.select_storage(2), Err(Error::InvalidStorageIndex(2)));
}

#[test]
fn test_transaction_ids_increase_per_operation() {
    let mut mtp = ready(populated());
    let before = mtp.engine().next_transaction_id();
    mtp.get_object_info(1).unwrap();
    mtp.get_object(2).unwrap();
    let tids: Vec<u32> = sent(&mtp).iter().rev().take(2).map(|(_, tid, _)| *tid).collect();
    assert_eq!(tids, vec![before.0 + 1, before.0]);
    assert_eq!(mtp.engine().next_transaction_id(), TransactionId(before.0 + 2));
}

#[test]
fn test_retry_keeps_transaction_id() {
    let mut mtp = ready(populated());
    let expected = mtp.engine().next_transaction_id();
    let submitted = mtp.host().submissions();
    mtp.host_mut().inject_retries(2);

    assert_eq!(mtp.get_object(1).unwrap(), vec![0xD8; 64]);
    let ops = sent(&mtp);
    assert_eq!(ops.len(), 5);
    assert_eq!(ops[4], (OperationCode::GET_OBJECT, expected.0, vec![1]));
    assert!(mtp.host().submissions() - submitted > 3);
}

#[test]
fn test_stall_faults_then_recovers() {
    let mut mtp = ready(populated());
    let stalled_tid = mtp.engine().next_transaction_id();
    mtp.host_mut().inject_stall();

    let err = mtp.get_object_handles(0, 0, ROOT_PARENT).unwrap_err();
    assert!(matches!(err, Error::Stalled { .. }));
    assert_eq!(err.fault_class(), FaultClass::Transport);
    assert!(mtp.engine().is_idle());
    // The stalled operation never reached the device.
    assert_eq!(sent(&mtp).len(), 4);

    mtp.host_mut().clear_halt();
    assert_eq!(mtp.get_object_handles(0, 0, ROOT_PARENT).unwrap(), vec![1, 2]);
    let (_, tid, _) = sent(&mtp).pop().unwrap();
    assert_eq!(tid, stalled_tid.0 + 1);
}

#[test]
fn test_device_error_response() {
    let mut mtp = ready(populated());
    mtp.host_mut()
        .device_mut()
        .fail_next(OperationCode::GET_OBJECT_INFO, ResponseCode::DEVICE_BUSY);

    let err = mtp.get_object_info(1).unwrap_err();
    assert_eq!(err, Error::Protocol(ResponseCode::DEVICE_BUSY));
    assert_eq!(err.fault_class(), FaultClass::Protocol);
    assert_eq!(err.response_code(), Some(ResponseCode::DEVICE_BUSY));

    assert_eq!(mtp.get_object_info(1).unwrap().filename, "IMG_0001.JPG");
}

#[test]
fn test_missing_object_skips_data_phase() {
    let mut mtp = ready(populated());
    assert_eq!(
        mtp.get_object(404),
        Err(Error::Protocol(ResponseCode::INVALID_OBJECT_HANDLE))
    );
    assert!(mtp.engine().is_idle());
    assert_eq!(mtp.get_object(2).unwrap().len(), 96);
}

#[test]
fn test_operation_timeout() {
    let mut mtp = ready(populated());
    mtp.host_mut().device_mut().hold_responses(true);

    let err = mtp.get_object(1).unwrap_err();
    match err {
        Error::Timeout { elapsed_ms } => assert!((5000..=5002).contains(&elapsed_ms)),
        ref other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(err.fault_class(), FaultClass::Timeout);
    assert!(mtp.engine().is_idle());

    mtp.host_mut().device_mut().hold_responses(false);
    mtp.host_mut().clear_halt();
    assert_eq!(mtp.get_object(1).unwrap().len(), 64);
}

#[test]
fn test_shorter_operation_budget() {
    let config = SessionConfig::default().with_operation_timeout_ms(250);
    let mut mtp = claimed(populated(), config);
    mtp.wait_ready().unwrap();
    mtp.host_mut().device_mut().hold_responses(true);
    assert!(matches!(
        mtp.get_num_objects(0, 0, 0),
        Err(Error::Timeout { elapsed_ms }) if (250..=252).contains(&elapsed_ms)
    ));
}

#[test]
fn test_disconnect() {
    let mut mtp = ready(populated());
    mtp.host_mut().disconnect();
    let err = mtp.get_object(1).unwrap_err();
    assert_eq!(err, Error::Disconnected);
    assert_eq!(err.fault_class(), FaultClass::Disconnect);
    assert!(mtp.engine().is_idle());
}

#[test]
fn test_halted_setup_restarts_with_fresh_ids() {
    let mut device = populated();
    device.hold_responses(true);
    let mut mtp = claimed(device, SessionConfig::default());

    assert!(matches!(mtp.wait_ready(), Err(Error::Timeout { .. })));
    assert!(matches!(mtp.session().halted(), Some(Error::Timeout { .. })));
    assert_eq!(mtp.advance(), Err(Error::SessionHalted));

    mtp.host_mut().device_mut().hold_responses(false);
    mtp.host_mut().clear_halt();
    mtp.restart();
    mtp.wait_ready().unwrap();

    let opens: Vec<u32> = sent(&mtp)
        .into_iter()
        .filter(|(code, _, _)| *code == OperationCode::OPEN_SESSION)
        .map(|(_, tid, _)| tid)
        .collect();
    assert_eq!(opens, vec![1, 1]);
}

#[test]
fn test_large_object_chunking() {
    let mut object = vec![0u8; 5000];
    rand::thread_rng().fill_bytes(&mut object);
    let mut device = MockDevice::default();
    device.add_object(0x20, STORAGE, "clip.bin", object.clone());
    let mut mtp = ready(device);

    // Two 512-byte packets per chunk: four full chunks and a tail.
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chunks);
    mtp.get_object_streamed(
        0x20,
        Box::new(move |chunk| sink.lock().unwrap().push(chunk.to_vec())),
    )
    .unwrap();

    let chunks = chunks.lock().unwrap();
    let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1024, 1024, 1024, 1024, 904]);
    assert_eq!(chunks.concat(), object);
    assert_eq!(mtp.engine().last_chunk_count(), 5);

    assert_eq!(mtp.get_object(0x20).unwrap(), object);
    assert_eq!(mtp.get_object_info(0x20).unwrap().compressed_size, 5000);
}

#[test]
fn test_exact_packet_multiple_object() {
    // 12-byte header plus 1012 bytes fills exactly two packets; the device
    // terminates the data phase with a zero-length packet.
    let object = vec![0x5A; 2 * HIGH_SPEED - 12];
    let mut device = MockDevice::default();
    device.add_object(3, STORAGE, "even.bin", object.clone());
    let mut mtp = ready(device);
    assert_eq!(mtp.get_object(3).unwrap(), object);
    assert_eq!(mtp.get_object_info(3).unwrap().filename, "even.bin");
}

#[test]
fn test_send_object_chunks_and_payload() {
    let mut payload = vec![0u8; 5000];
    rand::thread_rng().fill_bytes(&mut payload);
    let mut mtp = ready(MockDevice::default());

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sizes);
    mtp.send_object_with_progress(
        payload.clone(),
        Box::new(move |chunk| sink.lock().unwrap().push(chunk.len())),
    )
    .unwrap();

    assert_eq!(*sizes.lock().unwrap(), vec![1024, 1024, 1024, 1024, 904]);
    assert_eq!(mtp.host().device().last_received_object(), Some(&payload[..]));
    let (code, _, params) = sent(&mtp).pop().unwrap();
    assert_eq!(code, OperationCode::SEND_OBJECT);
    assert!(params.is_empty());
}

#[test]
fn test_partial_object_truncated_to_reported_length() {
    let mut mtp = ready(populated());
    let head = mtp.get_partial_object(2, 90, 64).unwrap();
    assert_eq!(head, vec![0xD9; 6]);
}

#[test]
fn test_close_and_reopen() {
    let mut mtp = ready(populated());
    mtp.close_session().unwrap();
    assert_eq!(mtp.host().device().session(), None);
    assert_eq!(mtp.get_object(1), Err(Error::NotReady));

    mtp.wait_ready().unwrap();
    assert_eq!(mtp.get_object(1).unwrap().len(), 64);
}
