//! Decoded PTP/MTP datasets.
//!
//! Each dataset is an immutable snapshot decoded from the payload of one
//! successful data-in transaction.

use crate::codes::{FormFlag, OperationCode};
use crate::decode::{FieldReader, PropertyValue, StringDecoding};
use crate::error::Result;

/// GetDeviceInfo dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// PTP version, in hundredths (100 = 1.00).
    pub standard_version: u16,
    /// Vendor extension id (6 = Microsoft/MTP).
    pub vendor_extension_id: u32,
    /// Vendor extension version.
    pub vendor_extension_version: u16,
    /// Vendor extension description.
    pub vendor_extension_desc: String,
    /// Functional mode.
    pub functional_mode: u16,
    /// Supported operation codes.
    pub operations_supported: Vec<u16>,
    /// Supported event codes.
    pub events_supported: Vec<u16>,
    /// Supported device property codes.
    pub device_properties_supported: Vec<u16>,
    /// Capture format codes.
    pub capture_formats: Vec<u16>,
    /// Playback (image) format codes.
    pub playback_formats: Vec<u16>,
    /// Manufacturer.
    pub manufacturer: String,
    /// Model.
    pub model: String,
    /// Device version.
    pub device_version: String,
    /// Serial number.
    pub serial_number: String,
}

impl DeviceInfo {
    /// Decode from a data-phase payload.
    pub fn parse(data: &[u8], mode: StringDecoding) -> Result<Self> {
        let mut r = FieldReader::new(data, mode);
        Ok(DeviceInfo {
            standard_version: r.u16()?,
            vendor_extension_id: r.u32()?,
            vendor_extension_version: r.u16()?,
            vendor_extension_desc: r.string()?,
            functional_mode: r.u16()?,
            operations_supported: r.u16_array()?,
            events_supported: r.u16_array()?,
            device_properties_supported: r.u16_array()?,
            capture_formats: r.u16_array()?,
            playback_formats: r.u16_array()?,
            manufacturer: r.optional_string()?,
            model: r.optional_string()?,
            device_version: r.optional_string()?,
            serial_number: r.optional_string()?,
        })
    }

    /// Whether the device lists `code` among its operations.
    pub fn supports_operation(&self, code: OperationCode) -> bool {
        self.operations_supported.contains(&code.0)
    }
}

/// GetStorageInfo dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageInfo {
    /// Storage type (fixed ROM, removable RAM, ...).
    pub storage_type: u16,
    /// Filesystem type.
    pub filesystem_type: u16,
    /// Access capability.
    pub access_capability: u16,
    /// Capacity in bytes.
    pub max_capacity: u64,
    /// Free space in bytes.
    pub free_space_bytes: u64,
    /// Free space in images.
    pub free_space_images: u32,
    /// Storage description.
    pub description: String,
    /// Volume label.
    pub volume_label: String,
}

impl StorageInfo {
    /// Decode from a data-phase payload.
    pub fn parse(data: &[u8], mode: StringDecoding) -> Result<Self> {
        let mut r = FieldReader::new(data, mode);
        Ok(StorageInfo {
            storage_type: r.u16()?,
            filesystem_type: r.u16()?,
            access_capability: r.u16()?,
            max_capacity: r.u64()?,
            free_space_bytes: r.u64()?,
            free_space_images: r.u32()?,
            description: r.string()?,
            volume_label: r.optional_string()?,
        })
    }
}

/// Offset of the filename string in a standard ObjectInfo dataset.
const OBJECT_INFO_FILENAME: usize = 52;

/// GetObjectInfo dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    /// Storage the object lives on.
    pub storage_id: u32,
    /// Object format code.
    pub object_format: u16,
    /// Protection status.
    pub protection_status: u16,
    /// Object size in bytes.
    pub compressed_size: u64,
    /// Thumbnail format.
    pub thumb_format: u16,
    /// Thumbnail size.
    pub thumb_compressed_size: u32,
    /// Thumbnail width.
    pub thumb_pix_width: u32,
    /// Thumbnail height.
    pub thumb_pix_height: u32,
    /// Image width.
    pub image_pix_width: u32,
    /// Image height.
    pub image_pix_height: u32,
    /// Image bit depth.
    pub image_bit_depth: u32,
    /// Parent object handle (0 for storage root).
    pub parent_object: u32,
    /// Association type (folders are 0x0001).
    pub association_type: u16,
    /// Association description.
    pub association_desc: u32,
    /// Sequence number.
    pub sequence_number: u32,
    /// File name.
    pub filename: String,
    /// Capture date, `YYYYMMDDThhmmss` form.
    pub capture_date: String,
    /// Modification date.
    pub modification_date: String,
    /// Keywords.
    pub keywords: String,
}

impl ObjectInfo {
    /// Decode from a data-phase payload.
    ///
    /// Some Samsung firmware sends the object size as a 64-bit field, pushing
    /// every later field 4 bytes back. That layout is recognised by an empty
    /// string at the standard filename offset followed by a nonzero byte 4
    /// bytes later.
    pub fn parse(data: &[u8], mode: StringDecoding) -> Result<Self> {
        let wide_size = data.len() > OBJECT_INFO_FILENAME + 4
            && data[OBJECT_INFO_FILENAME] == 0
            && data[OBJECT_INFO_FILENAME + 4] != 0;

        let mut r = FieldReader::new(data, mode);
        let storage_id = r.u32()?;
        let object_format = r.u16()?;
        let protection_status = r.u16()?;
        let compressed_size = if wide_size {
            r.u64()?
        } else {
            r.u32()? as u64
        };
        Ok(ObjectInfo {
            storage_id,
            object_format,
            protection_status,
            compressed_size,
            thumb_format: r.u16()?,
            thumb_compressed_size: r.u32()?,
            thumb_pix_width: r.u32()?,
            thumb_pix_height: r.u32()?,
            image_pix_width: r.u32()?,
            image_pix_height: r.u32()?,
            image_bit_depth: r.u32()?,
            parent_object: r.u32()?,
            association_type: r.u16()?,
            association_desc: r.u32()?,
            sequence_number: r.u32()?,
            filename: r.string()?,
            capture_date: r.optional_string()?,
            modification_date: r.optional_string()?,
            keywords: r.optional_string()?,
        })
    }

    /// True for folders.
    pub fn is_association(&self) -> bool {
        self.object_format == 0x3001
    }
}

/// Allowed-values form of a property description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyForm {
    /// No constraint.
    None,
    /// Inclusive range with a step.
    Range {
        /// Minimum.
        min: PropertyValue,
        /// Maximum.
        max: PropertyValue,
        /// Step.
        step: PropertyValue,
    },
    /// Explicit list.
    Enumeration(Vec<PropertyValue>),
    /// A form whose payload is not decoded (DateTime, RegEx, ...).
    Unparsed(FormFlag),
}

impl PropertyForm {
    fn read(r: &mut FieldReader<'_>, data_type: u16) -> Result<Self> {
        if r.remaining() == 0 {
            return Ok(PropertyForm::None);
        }
        Ok(match FormFlag::from_u8(r.u8()?) {
            FormFlag::None => PropertyForm::None,
            FormFlag::Range => PropertyForm::Range {
                min: r.value(data_type)?,
                max: r.value(data_type)?,
                step: r.value(data_type)?,
            },
            FormFlag::Enumeration => {
                let count = r.u16()?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(r.value(data_type)?);
                }
                PropertyForm::Enumeration(values)
            }
            other => PropertyForm::Unparsed(other),
        })
    }
}

/// GetObjectPropDesc dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPropDesc {
    /// Property code.
    pub property_code: u16,
    /// Wire data type code.
    pub data_type: u16,
    /// 0 = read-only, 1 = read/write.
    pub get_set: u8,
    /// Factory default.
    pub factory_default: PropertyValue,
    /// Group code.
    pub group_code: u32,
    /// Allowed values.
    pub form: PropertyForm,
}

impl ObjectPropDesc {
    /// Decode from a data-phase payload.
    pub fn parse(data: &[u8], mode: StringDecoding) -> Result<Self> {
        let mut r = FieldReader::new(data, mode);
        let property_code = r.u16()?;
        let data_type = r.u16()?;
        let get_set = r.u8()?;
        let factory_default = r.value(data_type)?;
        let group_code = r.u32()?;
        let form = PropertyForm::read(&mut r, data_type)?;
        Ok(ObjectPropDesc {
            property_code,
            data_type,
            get_set,
            factory_default,
            group_code,
            form,
        })
    }
}

/// GetDevicePropDesc dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePropDesc {
    /// Property code.
    pub property_code: u16,
    /// Wire data type code.
    pub data_type: u16,
    /// 0 = read-only, 1 = read/write.
    pub get_set: u8,
    /// Factory default.
    pub factory_default: PropertyValue,
    /// Current value.
    pub current: PropertyValue,
    /// Allowed values.
    pub form: PropertyForm,
}

impl DevicePropDesc {
    /// Decode from a data-phase payload.
    pub fn parse(data: &[u8], mode: StringDecoding) -> Result<Self> {
        let mut r = FieldReader::new(data, mode);
        let property_code = r.u16()?;
        let data_type = r.u16()?;
        let get_set = r.u8()?;
        let factory_default = r.value(data_type)?;
        let current = r.value(data_type)?;
        let form = PropertyForm::read(&mut r, data_type)?;
        Ok(DevicePropDesc {
            property_code,
            data_type,
            get_set,
            factory_default,
            current,
            form,
        })
    }
}

/// One element of an ObjPropList.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperty {
    /// Object handle.
    pub handle: u32,
    /// Property code.
    pub property_code: u16,
    /// Wire data type code.
    pub data_type: u16,
    /// Value.
    pub value: PropertyValue,
}

/// Decode a GetObjPropList payload.
pub fn parse_object_prop_list(data: &[u8], mode: StringDecoding) -> Result<Vec<ObjectProperty>> {
    let mut r = FieldReader::new(data, mode);
    let count = r.u32()?;
    // Each element is at least 9 bytes; never trust a count beyond that.
    let mut props = Vec::with_capacity((count as usize).min(r.remaining() / 9));
    for _ in 0..count {
        let handle = r.u32()?;
        let property_code = r.u16()?;
        let data_type = r.u16()?;
        let value = r.value(data_type)?;
        props.push(ObjectProperty {
            handle,
            property_code,
            data_type,
            value,
        });
    }
    Ok(props)
}
