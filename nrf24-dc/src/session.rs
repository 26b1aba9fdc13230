//! Session state machine: announce, exchange with every target, end.
//!
//! ```text
//! Idle -> ChannelSelect -> Announcing -> Exchanging <-> KeepAliveWatch -> Ending -> Idle
//! ```
//!
//! A session is linear and not reentrant. Everything from the announcement to the
//! forced end is bounded by the session timeout; the loop checks the deadline before
//! each device so a silent network costs at most one reading window past it.
use log::{debug, info, trace, warn};
use std::fmt::Debug;
use std::time::{Duration, Instant};

use crate::device::frame::{Frame, MAX_START_SESSION_DATA};
use crate::device::radio::{Radio, MAX_SIZE_OF_RF_PACKET};
use crate::error::SessionError;
use crate::registry::{CommStatus, MAX_SIZE_OF_DATA_FOR_SENDING};
use crate::server::{DcServer, ServerConfig};
use crate::time::{Clock, Deadline};
use crate::REPS_COUNT;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    ChannelSelect,
    Announcing,
    Exchanging,
    KeepAliveWatch,
    Ending,
}

impl Phase {
    /// Whether the machine may move from `self` to `next`.
    pub fn can_enter(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, ChannelSelect)
                | (ChannelSelect, Announcing)
                | (Announcing, Exchanging)
                | (Exchanging, KeepAliveWatch)
                | (Exchanging, Ending)
                | (KeepAliveWatch, Exchanging)
                | (KeepAliveWatch, Ending)
                | (Ending, Idle)
        )
    }
}

/// Why a session reached Ending.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Every target got its turn.
    Completed,
    /// The session timeout cut the exchange loop.
    Expired,
    /// No device acknowledged anything for a whole keepalive period.
    Idle,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub work_channel: u8,
    pub targets: usize,
    pub exchanged: usize,
    /// Time from the announcement to the Ending phase.
    pub duration: Duration,
    pub end: SessionEnd,
}

impl SessionOutcome {
    pub fn forced(&self) -> bool {
        self.end != SessionEnd::Completed
    }
}

#[derive(Debug, Clone)]
struct KeepAliveTimer {
    period: Duration,
    next_beacon: Deadline,
    last_activity: Instant,
}

/// Live state of the running session.
#[derive(Debug, Clone)]
pub struct SessionState {
    phase: Phase,
    work_channel: u8,
    announced_at: Option<Instant>,
    deadline: Option<Deadline>,
    keep_alive: Option<KeepAliveTimer>,
}

impl SessionState {
    fn new(config: &ServerConfig) -> Self {
        Self {
            phase: Phase::Idle,
            work_channel: config.work_channel,
            announced_at: None,
            deadline: None,
            keep_alive: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn work_channel(&self) -> u8 {
        self.work_channel
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    fn enter(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_enter(next),
            "illegal session transition {:?} -> {:?}",
            self.phase,
            next
        );
        trace!("Session phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn arm(&mut self, now: Instant, timeout: Duration, keep_alive: Option<Duration>) {
        self.announced_at = Some(now);
        self.deadline = Some(Deadline::after(now, timeout));
        self.keep_alive = keep_alive.map(|period| KeepAliveTimer {
            period,
            next_beacon: Deadline::after(now, period / 2),
            last_activity: now,
        });
    }
}

/// What the keepalive watch decided before the next device.
enum Watch {
    Continue,
    Beacon,
    Idle,
}

/// How far one device exchange got.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Exchange {
    /// The data was never acknowledged.
    Unreachable,
    /// Acknowledged, but no answer within the reading window.
    Silent,
    Answered,
}

fn saturating_ms(duration: Duration) -> u16 {
    duration.as_millis().min(u16::MAX as u128) as u16
}

impl<'k, T, E, Cl> DcServer<'k, T, E, Cl>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    /// Runs one full session and returns the number of devices exchanged with.
    ///
    /// Targets are the devices that answered the last lookup, or every handled device
    /// when no lookup ran since the previous session. Refuses to start while another
    /// session is active or when encryption is on without a key.
    pub fn start_session(&mut self) -> Result<usize, SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        self.cipher.ensure_ready()?;

        let census = self.census;
        let targets: Vec<usize> = self
            .registry
            .iter()
            .enumerate()
            .filter(|(_, record)| !census || record.status().has_responded())
            .map(|(index, _)| index)
            .collect();

        let mut state = SessionState::new(&self.config);
        state.enter(Phase::ChannelSelect);
        self.session = Some(state);

        if let Some(channel) = self.look_for_free_channel() {
            if channel != self.config.work_channel {
                debug!(
                    "Work channel moved from {} to {}.",
                    self.config.work_channel, channel
                );
            }
            self.config.work_channel = channel;
        }
        let work_channel = self.config.work_channel;
        let now = self.transport.now();
        let (timeout, keep_alive) = (self.config.session_timeout, self.config.keep_alive_timeout);
        if let Some(session) = self.session.as_mut() {
            session.work_channel = work_channel;
            session.enter(Phase::Announcing);
            session.arm(now, timeout, keep_alive);
        }
        let deadline = Deadline::after(now, timeout);

        info!(
            "Session started on channel {} with {} target(s).",
            work_channel,
            targets.len()
        );
        self.registry.begin_session();
        if !self.send_request_for_session() {
            warn!("Session announcement could not be sent.");
        }

        self.enter_phase(Phase::Exchanging);
        let mut exchanged = 0;
        let mut end = SessionEnd::Completed;
        for index in targets.iter().copied() {
            let now = self.transport.now();
            if deadline.is_expired(now) {
                end = SessionEnd::Expired;
                break;
            }
            match self.watch_keep_alive(now) {
                Watch::Continue => {}
                Watch::Beacon => {
                    self.enter_phase(Phase::KeepAliveWatch);
                    self.send_keep_alive_msg();
                    self.enter_phase(Phase::Exchanging);
                }
                Watch::Idle => {
                    end = SessionEnd::Idle;
                    break;
                }
            }
            // A link level acknowledgment keeps the session alive as much as an answer.
            match self.exchange_with(index, deadline) {
                Exchange::Answered => {
                    exchanged += 1;
                    self.touch_keep_alive();
                }
                Exchange::Silent => self.touch_keep_alive(),
                Exchange::Unreachable => {}
            }
        }

        if end == SessionEnd::Completed {
            let left = deadline.remaining(self.transport.now());
            if left.is_zero() {
                end = SessionEnd::Expired;
            } else if self.wait_end_session_tag(left) {
                trace!("A peer closed the session first.");
            }
        }

        self.enter_phase(Phase::Ending);
        let ended_at = self.transport.now();
        self.send_end_session_tag();
        let announced_at = self
            .session
            .take()
            .and_then(|session| session.announced_at)
            .unwrap_or(now);
        self.census = false;

        let outcome = SessionOutcome {
            work_channel,
            targets: targets.len(),
            exchanged,
            duration: ended_at.saturating_duration_since(announced_at),
            end,
        };
        info!(
            "Session ended ({:?}): {}/{} device(s) exchanged in {:?}.",
            outcome.end, outcome.exchanged, outcome.targets, outcome.duration
        );
        self.last_outcome = Some(outcome);
        Ok(exchanged)
    }

    fn enter_phase(&mut self, phase: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.enter(phase);
        }
    }

    fn watch_keep_alive(&mut self, now: Instant) -> Watch {
        let Some(timer) = self.session.as_mut().and_then(|s| s.keep_alive.as_mut()) else {
            return Watch::Continue;
        };
        if now.saturating_duration_since(timer.last_activity) >= timer.period {
            info!("Nothing acknowledged for {:?}, dropping the session.", timer.period);
            return Watch::Idle;
        }
        if timer.next_beacon.is_expired(now) {
            timer.next_beacon = Deadline::after(now, timer.period / 2);
            return Watch::Beacon;
        }
        Watch::Continue
    }

    fn touch_keep_alive(&mut self) {
        let now = self.transport.now();
        if let Some(timer) = self.session.as_mut().and_then(|s| s.keep_alive.as_mut()) {
            timer.last_activity = now;
        }
    }

    /// Sends the queued outbound data of `index` and waits for its answer.
    ///
    /// Only a data frame naming the polled device is accepted; late answers of devices
    /// polled before are dropped.
    fn exchange_with(&mut self, index: usize, deadline: Deadline) -> Exchange {
        let Some(record) = self.registry.get(index) else {
            return Exchange::Unreachable;
        };
        let id = record.id();
        let mut outbound = [0u8; MAX_SIZE_OF_DATA_FOR_SENDING];
        let len = record.outbound().len();
        outbound[..len].copy_from_slice(record.outbound());

        let address = self.client_address(id);
        if !self.set_single_client_mode(address) {
            self.registry.set_status(index, CommStatus::TimedOut);
            return Exchange::Unreachable;
        }
        let frame = Frame::Data {
            id,
            payload: &outbound[..len],
        };
        if !self.send_frame(&frame) {
            debug!("Client {} did not acknowledge its data.", id);
            self.registry.set_status(index, CommStatus::TimedOut);
            return Exchange::Unreachable;
        }

        let window = deadline.window(self.transport.now(), self.config.reading_timeout);
        let mut buf = [0u8; MAX_SIZE_OF_RF_PACKET];
        while let Some(size) = self.transport.read_until(&mut buf, window) {
            match Frame::try_from_bytes(&buf[..size]) {
                Ok(Frame::Data { id: from, payload }) if from == id => {
                    if let Some(stored) = self.registry.store_received(index, payload) {
                        self.cipher.decrypt(stored);
                    }
                    self.registry.set_status(index, CommStatus::DataReceived);
                    trace!("Client {} sent {} byte(s).", id, payload.len());
                    return Exchange::Answered;
                }
                Ok(Frame::Data { id: from, .. }) => {
                    debug!("Late data from client {} dropped while polling {}.", from, id)
                }
                Ok(frame) => trace!("Ignoring {:?} from client {}.", frame.tag(), id),
                Err(err) => debug!("Garbage from client {}: {}", id, err),
            }
        }
        debug!("Client {} did not answer in time.", id);
        self.registry.set_status(index, CommStatus::TimedOut);
        Exchange::Silent
    }

    /// Broadcasts the start tag `times` times on the broadcast channel.
    pub fn send_start_session_tag(&mut self, times: u8) -> bool {
        self.send_start_session_tag_with_data(&[], times)
    }

    /// Start tag carrying an application payload (encrypted like any data payload).
    pub fn send_start_session_tag_with_data(&mut self, data: &[u8], times: u8) -> bool {
        if data.len() > MAX_START_SESSION_DATA {
            warn!(
                "Start session data too big ({} bytes, max {}).",
                data.len(),
                MAX_START_SESSION_DATA
            );
            return false;
        }
        if !self.ensure_broadcast_mode() {
            return false;
        }
        let frame = Frame::StartSession {
            channel: self.config.work_channel,
            timeout_ms: saturating_ms(self.config.session_timeout),
            data,
        };
        let mut sent = false;
        for _ in 0..times {
            sent |= self.send_frame(&frame);
        }
        sent
    }

    /// Announces a session on the current work channel.
    pub fn send_request_for_session(&mut self) -> bool {
        self.send_start_session_tag(self.config.start_session_repeats)
    }

    pub fn send_keep_alive_msg(&mut self) -> bool {
        if !self.ensure_broadcast_mode() {
            return false;
        }
        self.send_frame(&Frame::KeepAlive)
    }

    /// Waits up to `left_time` (capped by the configured end wait) for a peer end tag.
    ///
    /// Listens in the current mode. A timeout is not an error: the caller moves on to
    /// Ending either way.
    pub fn wait_end_session_tag(&mut self, left_time: Duration) -> bool {
        let now = self.transport.now();
        let mut deadline = Deadline::after(now, left_time.min(self.config.end_session_wait));
        if let Some(session_deadline) = self.session.as_ref().and_then(SessionState::deadline) {
            deadline = deadline.earliest(session_deadline);
        }
        let mut buf = [0u8; MAX_SIZE_OF_RF_PACKET];
        while let Some(size) = self.transport.read_until(&mut buf, deadline) {
            if let Ok(Frame::EndSession) = Frame::try_from_bytes(&buf[..size]) {
                return true;
            }
        }
        false
    }

    /// Broadcasts the end tag `REPS_COUNT` times.
    pub fn send_end_session_tag(&mut self) -> bool {
        if !self.ensure_broadcast_mode() {
            return false;
        }
        let mut sent = false;
        for _ in 0..REPS_COUNT {
            sent |= self.send_frame(&Frame::EndSession);
        }
        sent
    }
}
