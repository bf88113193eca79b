#![no_main]

use libfuzzer_sys::fuzz_target;
use mtp_core::dataset::{
    parse_object_prop_list, DevicePropDesc, ObjectPropDesc,
};
use mtp_core::decode::{array_read, property_value_read, string_read};
use mtp_core::{DeviceInfo, ObjectInfo, StorageInfo, StringDecoding};

fuzz_target!(|data: &[u8]| {
    for mode in [StringDecoding::Narrow, StringDecoding::Utf16] {
        let _ = DeviceInfo::parse(data, mode);
        let _ = StorageInfo::parse(data, mode);
        let _ = ObjectInfo::parse(data, mode);
        let _ = ObjectPropDesc::parse(data, mode);
        let _ = DevicePropDesc::parse(data, mode);
        let _ = parse_object_prop_list(data, mode);
        let _ = string_read(data, 0, mode);
    }

    // Field readers consume no more than the buffer holds.
    if let Ok((_, used)) = array_read(data, 0, 4) {
        assert!(used <= data.len());
    }
    if data.len() >= 2 {
        let declared = u16::from_le_bytes([data[0], data[1]]);
        if let Ok((_, used)) = property_value_read(data, 2, declared, StringDecoding::Narrow) {
            assert!(2 + used <= data.len());
        }
    }
});
