//! Census of the handled devices on the broadcast channel.
use log::{debug, info, trace, warn};
use std::fmt::Debug;
use std::time::Duration;

use crate::device::frame::Frame;
use crate::device::radio::{Radio, MAX_SIZE_OF_RF_PACKET};
use crate::registry::CommStatus;
use crate::server::DcServer;
use crate::time::{Clock, Deadline};
use crate::NUMBER_OF_BROADCAST_REQUESTS;

/// Number of polls still due, the current one included, if every unanswered device
/// keeps staying silent.
fn pending_polls(unanswered_from_here: usize, unanswered: usize, rounds_left: usize) -> usize {
    (unanswered_from_here + unanswered * rounds_left).max(1)
}

/// Listening window of one poll: a fair share of what is left, never more than the
/// reading timeout.
fn poll_window(remaining: Duration, pending: usize, reading_timeout: Duration) -> Duration {
    (remaining / pending.max(1) as u32).min(reading_timeout)
}

impl<'k, T, E, Cl> DcServer<'k, T, E, Cl>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    /// Polls every handled device and returns how many answered.
    ///
    /// Previous statuses are cleared first. Devices are polled in registry order for up
    /// to `NUMBER_OF_BROADCAST_REQUESTS` rounds, a round only revisiting the silent
    /// ones. Polled devices that never answered end up `TimedOut`; devices the budget
    /// did not reach stay `NotContacted`. Returns once `timeout` is spent at the latest.
    pub fn look_for_client(&mut self, timeout: Duration) -> usize {
        let started = self.transport.now();
        let deadline = Deadline::after(started, timeout);
        self.registry.reset_statuses();
        self.census = true;
        let count = self.registry.handled_clients_count();
        if count == 0 {
            return 0;
        }
        if !self.set_broadcast_mode() {
            warn!("Lookup aborted, broadcast mode unavailable.");
            return 0;
        }
        if !deadline.is_expired(self.transport.now()) {
            self.send_request_for_lookup(timeout);
        }

        let mut polled = vec![false; count];
        'rounds: for round in 0..NUMBER_OF_BROADCAST_REQUESTS {
            let rounds_left = NUMBER_OF_BROADCAST_REQUESTS - round - 1;
            for index in 0..count {
                if self.is_responder(index) {
                    continue;
                }
                let now = self.transport.now();
                if deadline.is_expired(now) {
                    debug!("Lookup budget spent during round {}.", round + 1);
                    break 'rounds;
                }
                let unanswered = (0..count).filter(|i| !self.is_responder(*i)).count();
                let unanswered_from_here =
                    (index..count).filter(|i| !self.is_responder(*i)).count();
                let window = poll_window(
                    deadline.remaining(now),
                    pending_polls(unanswered_from_here, unanswered, rounds_left),
                    self.config.reading_timeout,
                );
                polled[index] = true;
                self.poll_client(index, deadline.window(now, window));
            }
            if self.registry.responded_count() == count {
                break;
            }
        }

        for (index, polled) in polled.into_iter().enumerate() {
            if polled && !self.is_responder(index) {
                self.registry.set_status(index, CommStatus::TimedOut);
            }
        }
        let responded = self.registry.responded_count();
        info!(
            "Lookup done: {}/{} client(s) answered in {:?}.",
            responded,
            count,
            self.transport.now().saturating_duration_since(started)
        );
        responded
    }

    fn is_responder(&self, index: usize) -> bool {
        self.registry
            .status_by_index(index)
            .map_or(false, |status| status.has_responded())
    }

    /// Asks one device to show up and listens until `window` for any lookup answer.
    ///
    /// Late answers of devices polled earlier are credited too.
    fn poll_client(&mut self, index: usize, window: Deadline) -> bool {
        let Some(id) = self.registry.client_id_at(index) else {
            return false;
        };
        if !self.send_frame(&Frame::Lookup { id }) {
            return false;
        }
        let mut buf = [0u8; MAX_SIZE_OF_RF_PACKET];
        while let Some(size) = self.transport.read_until(&mut buf, window) {
            match Frame::try_from_bytes(&buf[..size]) {
                Ok(Frame::Lookup { id: answer }) => {
                    match self.registry.client_index_by_id(answer) {
                        Some(answer_index) => {
                            self.registry.set_status(answer_index, CommStatus::Responded)
                        }
                        None => trace!("Lookup answer from unknown client {}.", answer),
                    }
                    if answer == id {
                        return true;
                    }
                }
                Ok(frame) => trace!("Ignoring {:?} during lookup.", frame.tag()),
                Err(err) => trace!("Garbage during lookup: {}", err),
            }
        }
        false
    }

    /// Broadcasts the "who is there" announcement `NUMBER_OF_BROADCAST_REQUESTS` times.
    ///
    /// The frame carries `timeout` so peers know how long the census lasts.
    pub fn send_request_for_lookup(&mut self, timeout: Duration) -> bool {
        if !self.ensure_broadcast_mode() {
            return false;
        }
        let frame = Frame::WhoIsThere {
            timeout_ms: timeout.as_millis().min(u16::MAX as u128) as u16,
        };
        let mut sent = false;
        for _ in 0..NUMBER_OF_BROADCAST_REQUESTS {
            sent |= self.send_frame(&frame);
        }
        sent
    }
}
