//! MTP session state machine.
//!
//! Opens a session and collects what the host needs before it can issue
//! object operations: the DeviceInfo dataset, the storage id list and one
//! StorageInfo per storage unit. Each state issues exactly one transaction.
//!
//! ```text
//! OpeningSession ──► FetchingDeviceInfo ──► FetchingStorageIds
//!       ▲                                          │
//!       │ close / restart                          ▼
//!       │                         FetchingStorageInfo(0..N-1) ──► Ready
//! ```
//!
//! A failed step halts the session. Later calls report
//! [`Error::SessionHalted`] until [`Session::restart`].

use crate::codes::OperationCode;
use crate::container::Params;
use crate::dataset::{DeviceInfo, StorageInfo};
use crate::decode::{FieldReader, StringDecoding};
use crate::error::{Error, Result};
use crate::transaction::{Completion, Request, TransactionEngine};
use crate::transport::UsbHost;
use core::fmt;
use core::task::Poll;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session id sent with OpenSession. Must be nonzero.
    pub session_id: u32,
    /// Host-clock budget for one blocking operation, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Chunk-boundary callback threshold, in max packets.
    pub chunk_packets: usize,
    /// How dataset strings are decoded.
    pub string_decoding: StringDecoding,
    /// Poll the interrupt endpoint for events while Ready.
    pub event_polling: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: 1,
            operation_timeout_ms: 5000,
            chunk_packets: 2,
            string_decoding: StringDecoding::Narrow,
            event_polling: true,
        }
    }
}

impl SessionConfig {
    /// Set the session id.
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the blocking operation budget.
    pub fn with_operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.operation_timeout_ms = timeout_ms;
        self
    }

    /// Set the chunk-boundary threshold.
    pub fn with_chunk_packets(mut self, chunk_packets: usize) -> Self {
        self.chunk_packets = chunk_packets;
        self
    }

    /// Set the string decoding mode.
    pub fn with_string_decoding(mut self, mode: StringDecoding) -> Self {
        self.string_decoding = mode;
        self
    }

    /// Enable or disable event polling.
    pub fn with_event_polling(mut self, enabled: bool) -> Self {
        self.event_polling = enabled;
        self
    }
}

/// Session setup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Issuing OpenSession.
    OpeningSession,
    /// Issuing GetDeviceInfo.
    FetchingDeviceInfo,
    /// Issuing GetStorageIDs.
    FetchingStorageIds,
    /// Issuing GetStorageInfo for the storage at this index.
    FetchingStorageInfo(usize),
    /// Session open, storage known.
    Ready,
}

/// Outcome of one [`Session::advance`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Setup still in progress.
    Busy,
    /// Session is Ready.
    Ready,
}

/// Callback fired when the session reaches Ready.
pub type ReadyCallback = Box<dyn FnMut() + Send>;

/// Session state and the tables collected while opening it.
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    issued: bool,
    halted: Option<Error>,
    device_info: Option<DeviceInfo>,
    storage_ids: Vec<u32>,
    storage_infos: Vec<StorageInfo>,
    current_storage: usize,
    on_ready: Option<ReadyCallback>,
}

impl Session {
    /// New session in OpeningSession.
    pub fn new(config: SessionConfig) -> Self {
        Session {
            config,
            state: SessionState::OpeningSession,
            issued: false,
            halted: None,
            device_info: None,
            storage_ids: Vec::new(),
            storage_infos: Vec::new(),
            current_storage: 0,
            on_ready: None,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once setup completed.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Error that halted setup, if any.
    pub fn halted(&self) -> Option<&Error> {
        self.halted.as_ref()
    }

    /// Register the callback fired on reaching Ready.
    pub fn set_ready_callback(&mut self, callback: ReadyCallback) {
        self.on_ready = Some(callback);
    }

    /// DeviceInfo collected during setup.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Storage ids reported by the device.
    pub fn storage_ids(&self) -> &[u32] {
        &self.storage_ids
    }

    /// Number of storage units.
    pub fn storage_count(&self) -> usize {
        self.storage_ids.len()
    }

    /// StorageInfo of the unit at `index`.
    pub fn storage_info(&self, index: usize) -> Option<&StorageInfo> {
        self.storage_infos.get(index)
    }

    /// Storage id at `index`.
    pub fn storage_id(&self, index: usize) -> Result<u32> {
        self.storage_ids
            .get(index)
            .copied()
            .ok_or(Error::InvalidStorageIndex(index))
    }

    /// Make the unit at `index` the current storage.
    pub fn select_storage(&mut self, index: usize) -> Result<()> {
        self.storage_id(index)?;
        self.current_storage = index;
        Ok(())
    }

    /// Index of the current storage.
    pub fn current_storage_index(&self) -> usize {
        self.current_storage
    }

    /// Id of the current storage, if any storage exists.
    pub fn current_storage(&self) -> Option<u32> {
        self.storage_ids.get(self.current_storage).copied()
    }

    /// Clear a halt and start again from OpeningSession.
    pub fn restart(&mut self) {
        tracing::debug!(halted = ?self.halted, "session restart");
        self.reset();
    }

    /// Forget the open session and collected tables.
    pub(crate) fn reset(&mut self) {
        self.state = SessionState::OpeningSession;
        self.issued = false;
        self.halted = None;
        self.device_info = None;
        self.storage_ids.clear();
        self.storage_infos.clear();
        self.current_storage = 0;
    }

    /// Forget the setup step in flight so the next advance issues it again.
    pub(crate) fn abandon_step(&mut self) {
        if self.issued {
            tracing::debug!(state = ?self.state, "setup step abandoned");
            self.issued = false;
        }
    }

    /// Halt setup with `error`.
    pub(crate) fn halt(&mut self, error: Error) {
        tracing::warn!(state = ?self.state, %error, "session halted");
        self.issued = false;
        self.halted = Some(error);
    }

    /// Run one setup step.
    ///
    /// Issues the transaction for the current state if none is outstanding,
    /// otherwise drives the outstanding one.
    pub fn advance<H: UsbHost>(
        &mut self,
        engine: &mut TransactionEngine,
        host: &mut H,
    ) -> Result<SessionStatus> {
        if self.halted.is_some() {
            return Err(Error::SessionHalted);
        }
        if self.state == SessionState::Ready {
            return Ok(SessionStatus::Ready);
        }

        if !self.issued {
            let request = self.request()?;
            if self.state == SessionState::OpeningSession {
                engine.reset_transaction_ids();
            }
            engine.begin(request)?;
            self.issued = true;
            return Ok(SessionStatus::Busy);
        }

        match engine.advance(host) {
            Poll::Pending => Ok(SessionStatus::Busy),
            Poll::Ready(Ok(done)) => {
                self.issued = false;
                match self.on_completion(done) {
                    Ok(()) if self.is_ready() => Ok(SessionStatus::Ready),
                    Ok(()) => Ok(SessionStatus::Busy),
                    Err(e) => {
                        self.halt(e.clone());
                        Err(e)
                    }
                }
            }
            Poll::Ready(Err(e)) => {
                self.halt(e.clone());
                Err(e)
            }
        }
    }

    fn request(&self) -> Result<Request> {
        Ok(match self.state {
            SessionState::OpeningSession => Request::new(
                OperationCode::OPEN_SESSION,
                Params::from_fixed([self.config.session_id]),
            ),
            SessionState::FetchingDeviceInfo => {
                Request::receiving(OperationCode::GET_DEVICE_INFO, Params::none())
            }
            SessionState::FetchingStorageIds => {
                Request::receiving(OperationCode::GET_STORAGE_IDS, Params::none())
            }
            SessionState::FetchingStorageInfo(index) => Request::receiving(
                OperationCode::GET_STORAGE_INFO,
                Params::from_fixed([self.storage_id(index)?]),
            ),
            SessionState::Ready => return Err(Error::InvalidState),
        })
    }

    fn on_completion(&mut self, done: Completion) -> Result<()> {
        let mode = self.config.string_decoding;
        let next = match self.state {
            SessionState::OpeningSession => SessionState::FetchingDeviceInfo,
            SessionState::FetchingDeviceInfo => {
                let info = DeviceInfo::parse(&done.data, mode)?;
                tracing::debug!(
                    manufacturer = %info.manufacturer,
                    model = %info.model,
                    serial = %info.serial_number,
                    "device info"
                );
                self.device_info = Some(info);
                SessionState::FetchingStorageIds
            }
            SessionState::FetchingStorageIds => {
                self.storage_ids = FieldReader::new(&done.data, mode).u32_array()?;
                self.storage_infos.clear();
                if self.storage_ids.is_empty() {
                    SessionState::Ready
                } else {
                    SessionState::FetchingStorageInfo(0)
                }
            }
            SessionState::FetchingStorageInfo(index) => {
                self.storage_infos
                    .push(StorageInfo::parse(&done.data, mode)?);
                if index + 1 < self.storage_ids.len() {
                    SessionState::FetchingStorageInfo(index + 1)
                } else {
                    SessionState::Ready
                }
            }
            SessionState::Ready => return Err(Error::InvalidState),
        };

        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
        if next == SessionState::Ready {
            self.current_storage = 0;
            tracing::info!(storages = self.storage_ids.len(), "MTP session ready");
            if let Some(callback) = self.on_ready.as_mut() {
                callback();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("halted", &self.halted)
            .field("storage_ids", &self.storage_ids)
            .field("current_storage", &self.current_storage)
            .finish()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::codes::ResponseCode;
    use crate::mock::{MockDevice, MockHost, MockStorage};
    use crate::transport::MtpPipes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup(device: MockDevice) -> (MockHost, TransactionEngine, Session) {
        let mut host = MockHost::new(device, 64);
        let endpoints = host.endpoints();
        let pipes = MtpPipes::open(&mut host, &endpoints).unwrap();
        let engine = TransactionEngine::new(&pipes, 2);
        (host, engine, Session::new(SessionConfig::default()))
    }

    fn drive(
        session: &mut Session,
        engine: &mut TransactionEngine,
        host: &mut MockHost,
    ) -> Result<()> {
        for _ in 0..100_000 {
            if session.advance(engine, host)? == SessionStatus::Ready {
                return Ok(());
            }
        }
        panic!("session did not settle");
    }

    #[test]
    fn test_open_sequence_reaches_ready() {
        let (mut host, mut engine, mut session) = setup(MockDevice::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session.set_ready_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        drive(&mut session, &mut engine, &mut host).unwrap();

        let ops: Vec<_> = host
            .device()
            .operations()
            .iter()
            .map(|op| (op.operation_code(), op.params.as_slice().to_vec()))
            .collect();
        assert_eq!(
            ops,
            vec![
                (OperationCode::OPEN_SESSION, vec![1]),
                (OperationCode::GET_DEVICE_INFO, vec![]),
                (OperationCode::GET_STORAGE_IDS, vec![]),
                (OperationCode::GET_STORAGE_INFO, vec![0x0001_0001]),
            ]
        );
        assert_eq!(host.device().operations()[0].transaction_id.0, 1);
        assert_eq!(session.storage_ids(), &[0x0001_0001]);
        assert_eq!(session.current_storage(), Some(0x0001_0001));
        assert_eq!(session.device_info().unwrap().manufacturer, "Acme");
        assert_eq!(
            session.storage_info(0).unwrap().description,
            "Internal storage"
        );

        // Further ticks stay Ready and never re-fire the callback.
        for _ in 0..10 {
            assert_eq!(
                session.advance(&mut engine, &mut host),
                Ok(SessionStatus::Ready)
            );
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_storage_info_fetched_per_unit() {
        let mut device = MockDevice::default();
        device.set_storages(vec![
            MockStorage {
                id: 0x0001_0001,
                description: "Phone".into(),
                capacity: 1 << 30,
                free: 1 << 20,
            },
            MockStorage {
                id: 0x0002_0001,
                description: "SD card".into(),
                capacity: 1 << 34,
                free: 1 << 33,
            },
        ]);
        let (mut host, mut engine, mut session) = setup(device);
        drive(&mut session, &mut engine, &mut host).unwrap();

        assert_eq!(session.storage_count(), 2);
        assert_eq!(session.storage_info(1).unwrap().description, "SD card");
        assert_eq!(session.storage_info(1).unwrap().free_space_bytes, 1 << 33);

        session.select_storage(1).unwrap();
        assert_eq!(session.current_storage(), Some(0x0002_0001));
        assert_eq!(
            session.select_storage(2),
            Err(Error::InvalidStorageIndex(2))
        );
    }

    #[test]
    fn test_failed_step_halts_until_restart() {
        let mut device = MockDevice::default();
        device.fail_next(OperationCode::GET_DEVICE_INFO, ResponseCode::DEVICE_BUSY);
        let (mut host, mut engine, mut session) = setup(device);

        assert_eq!(
            drive(&mut session, &mut engine, &mut host),
            Err(Error::Protocol(ResponseCode::DEVICE_BUSY))
        );
        assert_eq!(session.state(), SessionState::FetchingDeviceInfo);
        assert_eq!(
            session.advance(&mut engine, &mut host),
            Err(Error::SessionHalted)
        );

        session.restart();
        assert_eq!(session.state(), SessionState::OpeningSession);
        drive(&mut session, &mut engine, &mut host).unwrap();
        assert!(session.is_ready());
    }

    #[test]
    fn test_zero_session_id_rejected_by_device() {
        let (mut host, mut engine, _) = setup(MockDevice::default());
        let mut session = Session::new(SessionConfig::default().with_session_id(0));
        assert_eq!(
            drive(&mut session, &mut engine, &mut host),
            Err(Error::Protocol(ResponseCode::INVALID_PARAMETER))
        );
        assert!(session.halted().is_some());
    }

    #[test]
    fn test_no_storage_goes_straight_to_ready() {
        let mut device = MockDevice::default();
        device.set_storages(Vec::new());
        let (mut host, mut engine, mut session) = setup(device);
        drive(&mut session, &mut engine, &mut host).unwrap();
        assert_eq!(session.storage_count(), 0);
        assert_eq!(session.current_storage(), None);
    }
}
