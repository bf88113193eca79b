//! Interrupt-endpoint event poller.
//!
//! Events are polled only while the session is Ready and no transaction is
//! in flight. A receive is armed on an even clock tick; once it completes the
//! event is decoded, handed to the callback and the receive re-armed at
//! once. A receive that stays pending for the endpoint's poll interval is
//! re-armed.
//!
//! There is no backlog: an event that arrives while a transaction runs is
//! picked up only if the device still holds it when polling resumes.

use crate::codes::EventCode;
use crate::container::EventContainer;
use crate::transport::{Pipe, TransferState, UsbHost};
use core::fmt;

/// Callback invoked with the event code and its first parameter.
pub type EventCallback = Box<dyn FnMut(EventCode, u32) + Send>;

/// Poller for the notification pipe.
pub struct EventPoller {
    pipe: Pipe,
    armed_at: Option<u64>,
    callback: Option<EventCallback>,
    delivered: u64,
}

impl EventPoller {
    /// Poller over the interrupt IN pipe.
    pub fn new(pipe: Pipe) -> Self {
        EventPoller {
            pipe,
            armed_at: None,
            callback: None,
            delivered: 0,
        }
    }

    /// Register the event callback, replacing any previous one.
    pub fn set_callback(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    /// True while a receive is outstanding.
    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Events decoded so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Forget the outstanding receive.
    pub fn disarm(&mut self) {
        self.armed_at = None;
    }

    /// Run one polling step.
    pub fn poll<H: UsbHost>(&mut self, host: &mut H) {
        let Some(armed_at) = self.armed_at else {
            if host.now_ms() & 1 == 0 {
                self.arm(host);
            }
            return;
        };

        match host.poll(self.pipe.id) {
            TransferState::Done => {
                match EventContainer::parse(host.received(self.pipe.id)) {
                    Ok(event) => {
                        self.delivered += 1;
                        tracing::trace!(
                            code = %event.code,
                            param1 = event.param1(),
                            tid = %event.transaction_id,
                            "event"
                        );
                        if let Some(callback) = self.callback.as_mut() {
                            callback(event.code, event.param1());
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "undecodable event container"),
                }
                self.arm(host);
            }
            TransferState::Retry => self.arm(host),
            TransferState::Stalled => {
                tracing::warn!(pipe = ?self.pipe.id, "notification pipe stalled");
                self.armed_at = None;
            }
            TransferState::Pending => {
                let interval = u64::from(self.pipe.interval.max(1));
                if host.now_ms().saturating_sub(armed_at) >= interval {
                    self.arm(host);
                }
            }
        }
    }

    fn arm<H: UsbHost>(&mut self, host: &mut H) {
        match host.submit_receive(self.pipe.id, self.pipe.max_packet) {
            Ok(()) => self.armed_at = Some(host.now_ms()),
            Err(e) => {
                tracing::warn!(error = %e, "arming event receive failed");
                self.armed_at = None;
            }
        }
    }
}

impl fmt::Debug for EventPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPoller")
            .field("pipe", &self.pipe)
            .field("armed_at", &self.armed_at)
            .field("delivered", &self.delivered)
            .finish()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::container::TransactionId;
    use crate::mock::{MockDevice, MockHost};
    use crate::transport::MtpPipes;
    use std::sync::{Arc, Mutex};

    fn poller(host: &mut MockHost) -> EventPoller {
        let pipes = MtpPipes::open(host, &host.endpoints()).unwrap();
        EventPoller::new(pipes.notify)
    }

    #[test]
    fn test_arms_on_even_tick_only() {
        let mut host = MockHost::new(MockDevice::default(), 64);
        let mut events = poller(&mut host);
        host.advance_clock(1);
        events.poll(&mut host);
        assert!(!events.is_armed());
        host.advance_clock(1);
        events.poll(&mut host);
        assert!(events.is_armed());
    }

    #[test]
    fn test_event_reaches_callback_and_rearms() {
        let mut host = MockHost::new(MockDevice::default(), 64);
        let mut events = poller(&mut host);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.set_callback(Box::new(move |code, param| {
            sink.lock().unwrap().push((code, param))
        }));

        host.push_event(EventContainer {
            code: EventCode::OBJECT_ADDED,
            transaction_id: TransactionId(0),
            params: [0x55, 0, 0],
        });
        host.push_event(EventContainer {
            code: EventCode::STORE_REMOVED,
            transaction_id: TransactionId(0),
            params: [0x0002_0001, 0, 0],
        });

        for _ in 0..20 {
            events.poll(&mut host);
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventCode::OBJECT_ADDED, 0x55),
                (EventCode::STORE_REMOVED, 0x0002_0001),
            ]
        );
        assert_eq!(events.delivered(), 2);
        assert!(events.is_armed());
    }

    #[test]
    fn test_pending_receive_rearmed_after_interval() {
        let mut host = MockHost::new(MockDevice::default(), 64).with_notify_interval(8);
        let mut events = poller(&mut host);
        events.poll(&mut host);
        assert!(events.is_armed());
        let armed = host.submissions();

        // Each poll advances the mock clock by one tick.
        for _ in 0..7 {
            events.poll(&mut host);
        }
        assert_eq!(host.submissions(), armed);
        events.poll(&mut host);
        assert_eq!(host.submissions(), armed + 1);
    }
}
