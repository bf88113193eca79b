#![no_main]

use libfuzzer_sys::fuzz_target;
use mtp_core::container::{decode_response, ContainerHeader};
use mtp_core::{Container, EventContainer};

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic on device-supplied bytes.
    let _ = ContainerHeader::parse(data);
    let _ = EventContainer::parse(data);
    let _ = decode_response(data);

    // A container that parses re-encodes to its own declared prefix.
    if let Ok(container) = Container::parse(data) {
        let encoded = container.encode();
        assert_eq!(&data[..encoded.len()], &encoded[..], "re-encode mismatch");
        assert_eq!(Container::parse(&encoded), Ok(container));
    }
});
