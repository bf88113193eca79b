//! PTP/MTP code spaces: operations, responses, events and data types.
//!
//! Operation, response and event codes are open sets (vendors extend them),
//! so they are newtypes over `u16` with named constants. Data types and form
//! flags are closed and modelled as enums.

use core::fmt;

macro_rules! code_space {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$cmeta:meta])* $konst:ident = $value:literal => $label:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u16);

        impl $name {
            $( $(#[$cmeta])* pub const $konst: $name = $name($value); )*

            /// Standard name, if the code is a known one.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some($label), )*
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(label) => write!(f, "{} (0x{:04X})", label, self.0),
                    None => write!(f, "0x{:04X}", self.0),
                }
            }
        }

        impl From<u16> for $name {
            fn from(raw: u16) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u16 {
            fn from(code: $name) -> u16 {
                code.0
            }
        }
    };
}

code_space! {
    /// Operation code carried by an Operation or Data container.
    OperationCode {
        /// GetDeviceInfo.
        GET_DEVICE_INFO = 0x1001 => "GetDeviceInfo",
        /// OpenSession.
        OPEN_SESSION = 0x1002 => "OpenSession",
        /// CloseSession.
        CLOSE_SESSION = 0x1003 => "CloseSession",
        /// GetStorageIDs.
        GET_STORAGE_IDS = 0x1004 => "GetStorageIDs",
        /// GetStorageInfo.
        GET_STORAGE_INFO = 0x1005 => "GetStorageInfo",
        /// GetNumObjects.
        GET_NUM_OBJECTS = 0x1006 => "GetNumObjects",
        /// GetObjectHandles.
        GET_OBJECT_HANDLES = 0x1007 => "GetObjectHandles",
        /// GetObjectInfo.
        GET_OBJECT_INFO = 0x1008 => "GetObjectInfo",
        /// GetObject.
        GET_OBJECT = 0x1009 => "GetObject",
        /// DeleteObject.
        DELETE_OBJECT = 0x100B => "DeleteObject",
        /// SendObject.
        SEND_OBJECT = 0x100D => "SendObject",
        /// GetDevicePropDesc.
        GET_DEVICE_PROP_DESC = 0x1014 => "GetDevicePropDesc",
        /// GetPartialObject.
        GET_PARTIAL_OBJECT = 0x101B => "GetPartialObject",
        /// GetObjectPropsSupported (MTP).
        GET_OBJECT_PROPS_SUPPORTED = 0x9801 => "GetObjectPropsSupported",
        /// GetObjectPropDesc (MTP).
        GET_OBJECT_PROP_DESC = 0x9802 => "GetObjectPropDesc",
        /// GetObjPropList (MTP).
        GET_OBJ_PROP_LIST = 0x9805 => "GetObjPropList",
    }
}

code_space! {
    /// Response code carried by a Response container.
    ResponseCode {
        /// Undefined.
        UNDEFINED = 0x2000 => "Undefined",
        /// Success.
        OK = 0x2001 => "OK",
        /// GeneralError.
        GENERAL_ERROR = 0x2002 => "GeneralError",
        /// SessionNotOpen.
        SESSION_NOT_OPEN = 0x2003 => "SessionNotOpen",
        /// InvalidTransactionID.
        INVALID_TRANSACTION_ID = 0x2004 => "InvalidTransactionID",
        /// OperationNotSupported.
        OPERATION_NOT_SUPPORTED = 0x2005 => "OperationNotSupported",
        /// ParameterNotSupported.
        PARAMETER_NOT_SUPPORTED = 0x2006 => "ParameterNotSupported",
        /// IncompleteTransfer.
        INCOMPLETE_TRANSFER = 0x2007 => "IncompleteTransfer",
        /// InvalidStorageID.
        INVALID_STORAGE_ID = 0x2008 => "InvalidStorageID",
        /// InvalidObjectHandle.
        INVALID_OBJECT_HANDLE = 0x2009 => "InvalidObjectHandle",
        /// DevicePropNotSupported.
        DEVICE_PROP_NOT_SUPPORTED = 0x200A => "DevicePropNotSupported",
        /// InvalidObjectFormatCode.
        INVALID_OBJECT_FORMAT_CODE = 0x200B => "InvalidObjectFormatCode",
        /// StoreFull.
        STORE_FULL = 0x200C => "StoreFull",
        /// ObjectWriteProtected.
        OBJECT_WRITE_PROTECTED = 0x200D => "ObjectWriteProtected",
        /// StoreReadOnly.
        STORE_READ_ONLY = 0x200E => "StoreReadOnly",
        /// AccessDenied.
        ACCESS_DENIED = 0x200F => "AccessDenied",
        /// NoThumbnailPresent.
        NO_THUMBNAIL_PRESENT = 0x2010 => "NoThumbnailPresent",
        /// SelfTestFailed.
        SELF_TEST_FAILED = 0x2011 => "SelfTestFailed",
        /// PartialDeletion.
        PARTIAL_DELETION = 0x2012 => "PartialDeletion",
        /// StoreNotAvailable.
        STORE_NOT_AVAILABLE = 0x2013 => "StoreNotAvailable",
        /// SpecificationByFormatUnsupported.
        SPECIFICATION_BY_FORMAT_UNSUPPORTED = 0x2014 => "SpecificationByFormatUnsupported",
        /// NoValidObjectInfo.
        NO_VALID_OBJECT_INFO = 0x2015 => "NoValidObjectInfo",
        /// InvalidCodeFormat.
        INVALID_CODE_FORMAT = 0x2016 => "InvalidCodeFormat",
        /// UnknownVendorCode.
        UNKNOWN_VENDOR_CODE = 0x2017 => "UnknownVendorCode",
        /// CaptureAlreadyTerminated.
        CAPTURE_ALREADY_TERMINATED = 0x2018 => "CaptureAlreadyTerminated",
        /// DeviceBusy.
        DEVICE_BUSY = 0x2019 => "DeviceBusy",
        /// InvalidParentObject.
        INVALID_PARENT_OBJECT = 0x201A => "InvalidParentObject",
        /// InvalidDevicePropFormat.
        INVALID_DEVICE_PROP_FORMAT = 0x201B => "InvalidDevicePropFormat",
        /// InvalidDevicePropValue.
        INVALID_DEVICE_PROP_VALUE = 0x201C => "InvalidDevicePropValue",
        /// InvalidParameter.
        INVALID_PARAMETER = 0x201D => "InvalidParameter",
        /// SessionAlreadyOpened.
        SESSION_ALREADY_OPENED = 0x201E => "SessionAlreadyOpened",
        /// TransactionCancelled.
        TRANSACTION_CANCELLED = 0x201F => "TransactionCancelled",
        /// SpecificationOfDestinationUnsupported.
        SPECIFICATION_OF_DESTINATION_UNSUPPORTED = 0x2020 => "SpecificationOfDestinationUnsupported",
        /// InvalidEnumHandle.
        INVALID_ENUM_HANDLE = 0x2021 => "InvalidEnumHandle",
        /// NoStreamEnabled.
        NO_STREAM_ENABLED = 0x2022 => "NoStreamEnabled",
        /// InvalidDataSet.
        INVALID_DATA_SET = 0x2023 => "InvalidDataSet",
    }
}

impl ResponseCode {
    /// True for [`ResponseCode::OK`].
    pub fn is_ok(self) -> bool {
        self == ResponseCode::OK
    }
}

code_space! {
    /// Asynchronous event code delivered on the interrupt pipe.
    EventCode {
        /// Undefined.
        UNDEFINED = 0x4000 => "Undefined",
        /// CancelTransaction.
        CANCEL_TRANSACTION = 0x4001 => "CancelTransaction",
        /// ObjectAdded.
        OBJECT_ADDED = 0x4002 => "ObjectAdded",
        /// ObjectRemoved.
        OBJECT_REMOVED = 0x4003 => "ObjectRemoved",
        /// StoreAdded.
        STORE_ADDED = 0x4004 => "StoreAdded",
        /// StoreRemoved.
        STORE_REMOVED = 0x4005 => "StoreRemoved",
        /// DevicePropChanged.
        DEVICE_PROP_CHANGED = 0x4006 => "DevicePropChanged",
        /// ObjectInfoChanged.
        OBJECT_INFO_CHANGED = 0x4007 => "ObjectInfoChanged",
        /// DeviceInfoChanged.
        DEVICE_INFO_CHANGED = 0x4008 => "DeviceInfoChanged",
        /// RequestObjectTransfer.
        REQUEST_OBJECT_TRANSFER = 0x4009 => "RequestObjectTransfer",
        /// StoreFull.
        STORE_FULL = 0x400A => "StoreFull",
        /// DeviceReset.
        DEVICE_RESET = 0x400B => "DeviceReset",
        /// StorageInfoChanged.
        STORAGE_INFO_CHANGED = 0x400C => "StorageInfoChanged",
        /// CaptureComplete.
        CAPTURE_COMPLETE = 0x400D => "CaptureComplete",
        /// UnreportedStatus.
        UNREPORTED_STATUS = 0x400E => "UnreportedStatus",
    }
}

/// Bit marking an array data type.
pub const ARRAY_MASK: u16 = 0x4000;

/// Data type code of a length-prefixed string.
pub const STRING_TYPE: u16 = 0xFFFF;

/// Scalar element type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Signed 8-bit.
    Int8,
    /// Unsigned 8-bit.
    UInt8,
    /// Signed 16-bit.
    Int16,
    /// Unsigned 16-bit.
    UInt16,
    /// Signed 32-bit.
    Int32,
    /// Unsigned 32-bit.
    UInt32,
    /// Signed 64-bit.
    Int64,
    /// Unsigned 64-bit.
    UInt64,
    /// Signed 128-bit.
    Int128,
    /// Unsigned 128-bit.
    UInt128,
}

impl ScalarType {
    /// Parse the low bits of a data type code.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => ScalarType::Int8,
            0x0002 => ScalarType::UInt8,
            0x0003 => ScalarType::Int16,
            0x0004 => ScalarType::UInt16,
            0x0005 => ScalarType::Int32,
            0x0006 => ScalarType::UInt32,
            0x0007 => ScalarType::Int64,
            0x0008 => ScalarType::UInt64,
            0x0009 => ScalarType::Int128,
            0x000A => ScalarType::UInt128,
            _ => return None,
        })
    }

    /// Wire code.
    pub fn to_u16(self) -> u16 {
        match self {
            ScalarType::Int8 => 0x0001,
            ScalarType::UInt8 => 0x0002,
            ScalarType::Int16 => 0x0003,
            ScalarType::UInt16 => 0x0004,
            ScalarType::Int32 => 0x0005,
            ScalarType::UInt32 => 0x0006,
            ScalarType::Int64 => 0x0007,
            ScalarType::UInt64 => 0x0008,
            ScalarType::Int128 => 0x0009,
            ScalarType::UInt128 => 0x000A,
        }
    }

    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 => 4,
            ScalarType::Int64 | ScalarType::UInt64 => 8,
            ScalarType::Int128 | ScalarType::UInt128 => 16,
        }
    }

    /// Whether values are sign-extended.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarType::Int8
                | ScalarType::Int16
                | ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::Int128
        )
    }
}

/// Declared type of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Single scalar.
    Scalar(ScalarType),
    /// Count-prefixed array of scalars.
    Array(ScalarType),
    /// Length-prefixed string.
    String,
}

impl DataType {
    /// Parse a wire data type code.
    pub fn from_u16(code: u16) -> Option<Self> {
        if code == STRING_TYPE {
            return Some(DataType::String);
        }
        if code & ARRAY_MASK != 0 {
            return ScalarType::from_u16(code & !ARRAY_MASK).map(DataType::Array);
        }
        ScalarType::from_u16(code).map(DataType::Scalar)
    }

    /// Wire code.
    pub fn to_u16(self) -> u16 {
        match self {
            DataType::Scalar(s) => s.to_u16(),
            DataType::Array(s) => s.to_u16() | ARRAY_MASK,
            DataType::String => STRING_TYPE,
        }
    }
}

/// Form flag of a property description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFlag {
    /// No form.
    None,
    /// Range: min, max, step.
    Range,
    /// Enumeration of allowed values.
    Enumeration,
    /// DateTime string (MTP).
    DateTime,
    /// Fixed length array (MTP).
    FixedLengthArray,
    /// Regular expression (MTP).
    RegularExpression,
    /// Byte array (MTP).
    ByteArray,
    /// Long string (MTP).
    LongString,
    /// Anything else.
    Other(u8),
}

impl FormFlag {
    /// Parse a form flag byte.
    pub fn from_u8(flag: u8) -> Self {
        match flag {
            0x00 => FormFlag::None,
            0x01 => FormFlag::Range,
            0x02 => FormFlag::Enumeration,
            0x03 => FormFlag::DateTime,
            0x04 => FormFlag::FixedLengthArray,
            0x05 => FormFlag::RegularExpression,
            0x06 => FormFlag::ByteArray,
            0xFF => FormFlag::LongString,
            other => FormFlag::Other(other),
        }
    }
}
