//! Blocking object, storage and property operations.
//!
//! Every wrapper requires a Ready session, issues one transaction and drives
//! the engine until it resolves. The wait is bounded by the configured
//! operation budget measured on the host clock, and by the connection
//! status. On either bound the transaction is abandoned.

use crate::codes::OperationCode;
use crate::container::{Params, TransactionId};
use crate::dataset::{
    parse_object_prop_list, DevicePropDesc, DeviceInfo, ObjectInfo, ObjectPropDesc, ObjectProperty,
    StorageInfo,
};
use crate::decode::FieldReader;
use crate::device::MtpDevice;
use crate::error::{Error, Result};
use crate::transaction::{ChunkSink, Completion, Request};
use crate::transport::UsbHost;
use core::task::Poll;

/// Parent filter selecting objects at the storage root.
pub const ROOT_PARENT: u32 = 0xFFFF_FFFF;

impl<H: UsbHost> MtpDevice<H> {
    /// Run an arbitrary request to completion. Requires a Ready session.
    pub fn execute(&mut self, request: Request) -> Result<Completion> {
        self.begin(request)?;
        self.finish_blocking()
    }

    /// Start a request without waiting for it. Drive it with
    /// [`poll_transaction`](Self::poll_transaction).
    pub fn begin(&mut self, request: Request) -> Result<TransactionId> {
        if !self.session.is_ready() {
            return Err(Error::NotReady);
        }
        self.start_transaction(request)
    }

    /// Run one step of the transaction started with [`begin`](Self::begin).
    ///
    /// Resolves with [`Error::Disconnected`] once the device is gone and with
    /// [`Error::Timeout`] once the operation budget is spent; in both cases
    /// the transaction is abandoned.
    pub fn poll_transaction(&mut self) -> Poll<Result<Completion>> {
        let Some(start) = self.started_at else {
            return Poll::Ready(Err(Error::InvalidState));
        };
        if !self.host.is_connected() {
            self.abandon();
            return Poll::Ready(Err(Error::Disconnected));
        }
        if let Poll::Ready(outcome) = self.engine.advance(&mut self.host) {
            self.started_at = None;
            return Poll::Ready(outcome);
        }
        let elapsed_ms = self.host.now_ms().saturating_sub(start);
        if elapsed_ms > self.session.config().operation_timeout_ms {
            self.abandon();
            return Poll::Ready(Err(Error::Timeout { elapsed_ms }));
        }
        Poll::Pending
    }

    /// Give up on the transaction in flight, if any.
    ///
    /// During setup the current step is dropped too; the next
    /// [`advance`](Self::advance) issues it again.
    pub fn abandon(&mut self) {
        self.engine.abandon();
        self.started_at = None;
        self.session.abandon_step();
    }

    pub(crate) fn run_blocking(&mut self, request: Request) -> Result<Completion> {
        self.start_transaction(request)?;
        self.finish_blocking()
    }

    fn start_transaction(&mut self, request: Request) -> Result<TransactionId> {
        let tid = self.engine.begin(request)?;
        self.started_at = Some(self.host.now_ms());
        Ok(tid)
    }

    fn finish_blocking(&mut self) -> Result<Completion> {
        loop {
            if let Poll::Ready(outcome) = self.poll_transaction() {
                return outcome;
            }
        }
    }

    fn receive(&mut self, code: OperationCode, params: Params) -> Result<Vec<u8>> {
        Ok(self.execute(Request::receiving(code, params))?.data)
    }

    /// GetDeviceInfo.
    pub fn get_device_info(&mut self) -> Result<DeviceInfo> {
        let data = self.receive(OperationCode::GET_DEVICE_INFO, Params::none())?;
        DeviceInfo::parse(&data, self.session.config().string_decoding)
    }

    /// GetStorageIDs.
    pub fn get_storage_ids(&mut self) -> Result<Vec<u32>> {
        let data = self.receive(OperationCode::GET_STORAGE_IDS, Params::none())?;
        FieldReader::new(&data, self.session.config().string_decoding).u32_array()
    }

    /// GetStorageInfo for the storage at `storage_idx`.
    pub fn get_storage_info(&mut self, storage_idx: usize) -> Result<StorageInfo> {
        let storage_id = self.session.storage_id(storage_idx)?;
        let data = self.receive(OperationCode::GET_STORAGE_INFO, Params::from_fixed([storage_id]))?;
        StorageInfo::parse(&data, self.session.config().string_decoding)
    }

    /// GetNumObjects in the storage at `storage_idx`.
    ///
    /// `format` 0 matches every format; `association` is the parent handle
    /// (0 for any, [`ROOT_PARENT`] for the root).
    pub fn get_num_objects(&mut self, storage_idx: usize, format: u16, association: u32) -> Result<u32> {
        let storage_id = self.session.storage_id(storage_idx)?;
        let done = self.execute(Request::new(
            OperationCode::GET_NUM_OBJECTS,
            Params::from_fixed([storage_id, u32::from(format), association]),
        ))?;
        Ok(done.param1())
    }

    /// GetObjectHandles in the storage at `storage_idx`.
    pub fn get_object_handles(
        &mut self,
        storage_idx: usize,
        format: u16,
        association: u32,
    ) -> Result<Vec<u32>> {
        let storage_id = self.session.storage_id(storage_idx)?;
        let data = self.receive(
            OperationCode::GET_OBJECT_HANDLES,
            Params::from_fixed([storage_id, u32::from(format), association]),
        )?;
        FieldReader::new(&data, self.session.config().string_decoding).u32_array()
    }

    /// GetObjectInfo.
    pub fn get_object_info(&mut self, handle: u32) -> Result<ObjectInfo> {
        let data = self.receive(OperationCode::GET_OBJECT_INFO, Params::from_fixed([handle]))?;
        ObjectInfo::parse(&data, self.session.config().string_decoding)
    }

    /// GetObject, buffering the whole object.
    pub fn get_object(&mut self, handle: u32) -> Result<Vec<u8>> {
        self.receive(OperationCode::GET_OBJECT, Params::from_fixed([handle]))
    }

    /// GetObject, handing the payload to `sink` chunk by chunk.
    pub fn get_object_streamed(&mut self, handle: u32, sink: ChunkSink) -> Result<()> {
        self.execute(
            Request::receiving(OperationCode::GET_OBJECT, Params::from_fixed([handle]))
                .with_sink(sink),
        )?;
        Ok(())
    }

    /// GetPartialObject: at most `max_bytes` starting at `offset`.
    ///
    /// The result is cut to the length the device reports in its response.
    pub fn get_partial_object(&mut self, handle: u32, offset: u32, max_bytes: u32) -> Result<Vec<u8>> {
        let done = self.execute(Request::receiving(
            OperationCode::GET_PARTIAL_OBJECT,
            Params::from_fixed([handle, offset, max_bytes]),
        ))?;
        let reported = done.param1() as usize;
        let mut data = done.data;
        if reported < data.len() {
            data.truncate(reported);
        }
        Ok(data)
    }

    /// DeleteObject.
    pub fn delete_object(&mut self, handle: u32, format: u16) -> Result<()> {
        self.execute(Request::new(
            OperationCode::DELETE_OBJECT,
            Params::from_fixed([handle, u32::from(format)]),
        ))?;
        Ok(())
    }

    /// SendObject. The target is the one announced by the preceding
    /// SendObjectInfo, so the operation carries no parameters.
    pub fn send_object(&mut self, data: Vec<u8>) -> Result<()> {
        self.execute(Request::sending(OperationCode::SEND_OBJECT, Params::none(), data))?;
        Ok(())
    }

    /// SendObject, reporting acknowledged payload chunks to `progress`.
    pub fn send_object_with_progress(&mut self, data: Vec<u8>, progress: ChunkSink) -> Result<()> {
        self.execute(
            Request::sending(OperationCode::SEND_OBJECT, Params::none(), data).with_sink(progress),
        )?;
        Ok(())
    }

    /// GetObjectPropsSupported for `format`.
    pub fn get_object_props_supported(&mut self, format: u16) -> Result<Vec<u16>> {
        let data = self.receive(
            OperationCode::GET_OBJECT_PROPS_SUPPORTED,
            Params::from_fixed([u32::from(format)]),
        )?;
        FieldReader::new(&data, self.session.config().string_decoding).u16_array()
    }

    /// GetObjectPropDesc.
    pub fn get_object_prop_desc(&mut self, property: u16, format: u16) -> Result<ObjectPropDesc> {
        let data = self.receive(
            OperationCode::GET_OBJECT_PROP_DESC,
            Params::from_fixed([u32::from(property), u32::from(format)]),
        )?;
        ObjectPropDesc::parse(&data, self.session.config().string_decoding)
    }

    /// GetObjPropList: every property of `handle`.
    pub fn get_object_prop_list(&mut self, handle: u32) -> Result<Vec<ObjectProperty>> {
        let data = self.receive(
            OperationCode::GET_OBJ_PROP_LIST,
            Params::from_fixed([handle, 0, 0xFFFF_FFFF, 0, 0xFFFF_FFFF]),
        )?;
        parse_object_prop_list(&data, self.session.config().string_decoding)
    }

    /// GetDevicePropDesc.
    pub fn get_device_prop_desc(&mut self, property: u16) -> Result<DevicePropDesc> {
        let data = self.receive(
            OperationCode::GET_DEVICE_PROP_DESC,
            Params::from_fixed([u32::from(property)]),
        )?;
        DevicePropDesc::parse(&data, self.session.config().string_decoding)
    }
}
