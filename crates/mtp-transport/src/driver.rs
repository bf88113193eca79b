//! Tokio driver for [`MtpDevice`].
//!
//! One [`AsyncMtpDevice`] wraps a claimed device in a `tokio::sync::Mutex`.
//! An operation takes the lock, begins its transaction and polls the engine
//! until it resolves, yielding to the runtime every few steps. The lock is
//! held across those yields, so at most one transaction is in flight and
//! operations complete in the order they acquired the device.
//!
//! # Example
//!
//! ```
//! use mtp_core::mock::{MockDevice, MockHost};
//! use mtp_core::{MtpDevice, SessionConfig};
//! use mtp_transport::{AsyncMtpDevice, DriverConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mtp_transport::Result<()> {
//! let mut device = MockDevice::default();
//! device.add_object(1, 0x0001_0001, "a.txt", b"hi".to_vec());
//! let host = MockHost::new(device, 64);
//! let endpoints = host.endpoints();
//! let mtp = MtpDevice::claim(host, &endpoints, SessionConfig::default())?;
//!
//! let driver = AsyncMtpDevice::new(mtp, DriverConfig::default());
//! driver.wait_ready().await?;
//! assert_eq!(driver.get_object(1).await?, b"hi");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use core::future::Future;
use core::task::Poll;
use core::time::Duration;
use mtp_core::dataset::{parse_object_prop_list, ObjectInfo, ObjectProperty};
use mtp_core::decode::FieldReader;
use mtp_core::{
    ChunkSink, Completion, MtpDevice, OperationCode, Params, Request, UsbHost,
};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Wall-clock limit for one driver call.
    pub deadline: Duration,
    /// Engine steps between yields to the runtime.
    pub steps_per_yield: usize,
    /// Sleep between background ticks.
    pub tick_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            steps_per_yield: 64,
            tick_interval: Duration::from_millis(1),
        }
    }
}

impl DriverConfig {
    /// Set the per-call deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set how many engine steps run between yields.
    pub fn with_steps_per_yield(mut self, steps: usize) -> Self {
        self.steps_per_yield = steps.max(1);
        self
    }

    /// Set the background tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

/// Shareable async handle to a claimed MTP device.
pub struct AsyncMtpDevice<H: UsbHost> {
    inner: Arc<Mutex<MtpDevice<H>>>,
    config: DriverConfig,
}

impl<H: UsbHost> Clone for AsyncMtpDevice<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config,
        }
    }
}

impl<H> AsyncMtpDevice<H>
where
    H: UsbHost + Send + 'static,
{
    /// Wrap a claimed device.
    pub fn new(device: MtpDevice<H>, config: DriverConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(device)),
            config,
        }
    }

    /// Driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Lock the device for direct access.
    pub async fn lock(&self) -> MutexGuard<'_, MtpDevice<H>> {
        self.inner.lock().await
    }

    /// Tick the session until it is Ready.
    ///
    /// Setup follows [`MtpDevice::wait_ready`]: a disconnect or a step over
    /// the operation budget halts the session with that cause. Running past
    /// the driver deadline halts it with a timeout.
    pub async fn wait_ready(&self) -> Result<()> {
        self.with_deadline(self.tick_until_ready()).await
    }

    /// Run `request` to completion.
    pub async fn execute(&self, request: Request) -> Result<Completion> {
        self.with_deadline(self.run(request)).await
    }

    async fn tick_until_ready(&self) -> Result<()> {
        let mut device = self.inner.lock().await;
        loop {
            for _ in 0..self.config.steps_per_yield {
                if let Poll::Ready(outcome) = device.poll_ready() {
                    return Ok(outcome?);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    async fn run(&self, request: Request) -> Result<Completion> {
        let mut device = self.inner.lock().await;
        device.begin(request)?;
        loop {
            for _ in 0..self.config.steps_per_yield {
                if let Poll::Ready(outcome) = device.poll_transaction() {
                    return Ok(outcome?);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    async fn with_deadline<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let deadline = self.config.deadline;
                tracing::warn!(?deadline, "driver deadline exceeded");
                let mut device = self.inner.lock().await;
                if device.is_ready() {
                    device.abandon();
                } else {
                    let elapsed_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                    device.halt_setup(mtp_core::Error::Timeout { elapsed_ms });
                }
                Err(Error::Timeout(deadline))
            }
        }
    }

    async fn storage_id(&self, storage_idx: usize) -> Result<u32> {
        Ok(self.inner.lock().await.session().storage_id(storage_idx)?)
    }

    async fn string_mode(&self) -> mtp_core::StringDecoding {
        self.inner.lock().await.session().config().string_decoding
    }

    /// GetObjectHandles in the storage at `storage_idx`.
    pub async fn get_object_handles(
        &self,
        storage_idx: usize,
        format: u16,
        association: u32,
    ) -> Result<Vec<u32>> {
        let storage_id = self.storage_id(storage_idx).await?;
        let params = Params::from_slice(&[storage_id, u32::from(format), association])?;
        let done = self
            .execute(Request::receiving(OperationCode::GET_OBJECT_HANDLES, params))
            .await?;
        let mode = self.string_mode().await;
        Ok(FieldReader::new(&done.data, mode).u32_array()?)
    }

    /// GetObjectInfo.
    pub async fn get_object_info(&self, handle: u32) -> Result<ObjectInfo> {
        let params = Params::from_slice(&[handle])?;
        let done = self
            .execute(Request::receiving(OperationCode::GET_OBJECT_INFO, params))
            .await?;
        let mode = self.string_mode().await;
        Ok(ObjectInfo::parse(&done.data, mode)?)
    }

    /// GetObject, buffering the whole object.
    pub async fn get_object(&self, handle: u32) -> Result<Vec<u8>> {
        let params = Params::from_slice(&[handle])?;
        let done = self
            .execute(Request::receiving(OperationCode::GET_OBJECT, params))
            .await?;
        Ok(done.data)
    }

    /// GetObject, handing the payload to `sink` chunk by chunk.
    pub async fn get_object_streamed(&self, handle: u32, sink: ChunkSink) -> Result<()> {
        let params = Params::from_slice(&[handle])?;
        self.execute(Request::receiving(OperationCode::GET_OBJECT, params).with_sink(sink))
            .await?;
        Ok(())
    }

    /// DeleteObject.
    pub async fn delete_object(&self, handle: u32, format: u16) -> Result<()> {
        let params = Params::from_slice(&[handle, u32::from(format)])?;
        self.execute(Request::new(OperationCode::DELETE_OBJECT, params))
            .await?;
        Ok(())
    }

    /// SendObject.
    pub async fn send_object(&self, data: Vec<u8>) -> Result<()> {
        self.execute(Request::sending(
            OperationCode::SEND_OBJECT,
            Params::none(),
            data,
        ))
        .await?;
        Ok(())
    }

    /// GetObjPropList: every property of `handle`.
    pub async fn get_object_prop_list(&self, handle: u32) -> Result<Vec<ObjectProperty>> {
        let params = Params::from_slice(&[handle, 0, 0xFFFF_FFFF, 0, 0xFFFF_FFFF])?;
        let done = self
            .execute(Request::receiving(OperationCode::GET_OBJ_PROP_LIST, params))
            .await?;
        let mode = self.string_mode().await;
        Ok(parse_object_prop_list(&done.data, mode)?)
    }

    /// Issue CloseSession.
    pub async fn close_session(&self) -> Result<()> {
        Ok(self.inner.lock().await.close_session()?)
    }

    /// Keep the session and event poller ticking in the background.
    ///
    /// Each tick takes the lock briefly, so operations interleave with it.
    /// The task ends when the session halts or the device disconnects.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let interval = self.config.tick_interval;
        tokio::spawn(async move {
            loop {
                {
                    let mut device = inner.lock().await;
                    if !device.host().is_connected() {
                        tracing::debug!("device disconnected, ticker stopping");
                        return;
                    }
                    if let Err(e) = device.advance() {
                        tracing::warn!(error = %e, "ticker stopping");
                        return;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}
