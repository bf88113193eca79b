//! Claimed MTP interface.
//!
//! [`MtpDevice`] owns the host adapter, the three pipes, the transaction
//! engine, the session state machine and the event poller of one claimed
//! interface. Drive it with [`MtpDevice::advance`] from the host's tick, or
//! block on [`MtpDevice::wait_ready`].

use crate::codes::{EventCode, OperationCode};
use crate::container::Params;
use crate::dataset::{DeviceInfo, StorageInfo};
use crate::error::{Error, Result};
use crate::events::EventPoller;
use crate::session::{Session, SessionConfig, SessionState, SessionStatus};
use crate::transaction::{Request, TransactionEngine};
use crate::transport::{EndpointDescriptor, MtpEndpoints, MtpPipes, UsbHost};
use core::fmt;
use core::task::Poll;

/// One claimed MTP interface.
pub struct MtpDevice<H: UsbHost> {
    pub(crate) host: H,
    pipes: MtpPipes,
    pub(crate) engine: TransactionEngine,
    pub(crate) session: Session,
    events: EventPoller,
    /// Host clock at which the transaction in flight began.
    pub(crate) started_at: Option<u64>,
    /// Setup state being timed and when it was entered.
    setup_clock: Option<(SessionState, u64)>,
}

impl<H: UsbHost> MtpDevice<H> {
    /// Open the pipes for `endpoints` and start in OpeningSession.
    pub fn claim(mut host: H, endpoints: &MtpEndpoints, config: SessionConfig) -> Result<Self> {
        let pipes = MtpPipes::open(&mut host, endpoints)?;
        tracing::debug!(
            bulk_max_packet = pipes.bulk_in.max_packet,
            notify_interval = pipes.notify.interval,
            "MTP interface claimed"
        );
        Ok(MtpDevice {
            engine: TransactionEngine::new(&pipes, config.chunk_packets),
            events: EventPoller::new(pipes.notify),
            session: Session::new(config),
            host,
            pipes,
            started_at: None,
            setup_clock: None,
        })
    }

    /// Classify an interface's endpoint descriptors, then [`claim`](Self::claim).
    pub fn claim_interface(
        host: H,
        descriptors: &[EndpointDescriptor],
        config: SessionConfig,
    ) -> Result<Self> {
        let endpoints = MtpEndpoints::from_descriptors(descriptors)?;
        Self::claim(host, &endpoints, config)
    }

    /// Close the pipes and hand the adapter back.
    pub fn release(mut self) -> H {
        self.abandon();
        self.pipes.close(&mut self.host);
        tracing::debug!("MTP interface released");
        self.host
    }

    /// Run one tick: advance session setup, then poll for events while Ready.
    pub fn advance(&mut self) -> Result<SessionStatus> {
        let status = self.session.advance(&mut self.engine, &mut self.host)?;
        if status == SessionStatus::Ready
            && self.session.config().event_polling
            && self.engine.is_idle()
        {
            self.events.poll(&mut self.host);
        }
        Ok(status)
    }

    /// Tick until the session is Ready.
    ///
    /// Each setup step gets the configured operation budget. A step that
    /// exceeds it, or a disconnect, halts the session.
    pub fn wait_ready(&mut self) -> Result<()> {
        loop {
            if let Poll::Ready(outcome) = self.poll_ready() {
                return outcome;
            }
        }
    }

    /// Run one step of [`wait_ready`](Self::wait_ready).
    ///
    /// Resolves once the session is Ready or setup has failed. A failed
    /// setup leaves the session halted with the cause.
    pub fn poll_ready(&mut self) -> Poll<Result<()>> {
        if !self.host.is_connected() {
            return Poll::Ready(self.fail_setup(Error::Disconnected));
        }
        let (state, since) = *self
            .setup_clock
            .get_or_insert((self.session.state(), self.host.now_ms()));
        match self.advance() {
            Ok(SessionStatus::Ready) => {
                self.setup_clock = None;
                return Poll::Ready(Ok(()));
            }
            Ok(SessionStatus::Busy) => {}
            Err(e) => {
                self.setup_clock = None;
                return Poll::Ready(Err(e));
            }
        }
        let now = self.host.now_ms();
        if self.session.state() != state {
            self.setup_clock = Some((self.session.state(), now));
            return Poll::Pending;
        }
        let elapsed_ms = now.saturating_sub(since);
        if elapsed_ms > self.session.config().operation_timeout_ms {
            return Poll::Ready(self.fail_setup(Error::Timeout { elapsed_ms }));
        }
        Poll::Pending
    }

    /// Abandon the setup step in flight and halt the session with `error`.
    ///
    /// The session stays halted until [`restart`](Self::restart). Has no
    /// effect once the session is Ready.
    pub fn halt_setup(&mut self, error: Error) {
        if self.session.is_ready() {
            return;
        }
        self.abandon();
        self.setup_clock = None;
        self.session.halt(error);
    }

    fn fail_setup(&mut self, error: Error) -> Result<()> {
        self.halt_setup(error.clone());
        Err(error)
    }

    /// True once setup completed.
    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// Session setup state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Session tables and configuration.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Transaction engine.
    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    /// Event poller.
    pub fn events(&self) -> &EventPoller {
        &self.events
    }

    /// Host adapter.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Host adapter, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Register the callback fired when the session becomes Ready.
    pub fn on_ready<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.session.set_ready_callback(Box::new(callback));
    }

    /// Register the event callback, invoked with `(code, param1)`.
    pub fn on_event<F>(&mut self, callback: F)
    where
        F: FnMut(EventCode, u32) + Send + 'static,
    {
        self.events.set_callback(Box::new(callback));
    }

    /// Clear a halted setup and open the session again.
    pub fn restart(&mut self) {
        self.setup_clock = None;
        self.events.disarm();
        self.session.restart();
    }

    /// Issue CloseSession and return to OpeningSession.
    pub fn close_session(&mut self) -> Result<()> {
        if !self.session.is_ready() {
            return Err(Error::NotReady);
        }
        self.run_blocking(Request::new(OperationCode::CLOSE_SESSION, Params::none()))?;
        self.events.disarm();
        self.setup_clock = None;
        self.session.reset();
        tracing::debug!("MTP session closed");
        Ok(())
    }

    /// DeviceInfo collected during setup.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.session.device_info()
    }

    /// Number of storage units.
    pub fn storage_count(&self) -> usize {
        self.session.storage_count()
    }

    /// Storage ids.
    pub fn storage_ids(&self) -> &[u32] {
        self.session.storage_ids()
    }

    /// StorageInfo collected for the unit at `index`.
    pub fn storage_info(&self, index: usize) -> Option<&StorageInfo> {
        self.session.storage_info(index)
    }

    /// Make the unit at `index` the current storage.
    pub fn select_storage(&mut self, index: usize) -> Result<()> {
        self.session.select_storage(index)
    }

    /// Id of the current storage.
    pub fn current_storage(&self) -> Option<u32> {
        self.session.current_storage()
    }
}

impl<H: UsbHost> fmt::Debug for MtpDevice<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtpDevice")
            .field("pipes", &self.pipes)
            .field("engine", &self.engine)
            .field("session", &self.session)
            .field("events", &self.events)
            .finish()
    }
}
