//! Simulated radio medium shared by the integration tests.
//!
//! One [SimNetwork] holds a simulated clock and a set of peers. The server gets a
//! [SimRadio] attached to it: every delay advances the clock, every transmission costs
//! [AIRTIME] and is delivered at once to the peers listening on the radio channel and
//! addressed by the writing pipe. Peers are built on the crate's `CommandSet`.
#![allow(dead_code)]

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use radio::{Channel, Power, Receive, ReceiveInfo, Transmit};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use nrf24_dc::cipher::apply_keystream;
use nrf24_dc::command::{Command, CommandSet, Dispatch};
use nrf24_dc::device::frame::{broadcast_address, client_address, Frame, Tag};
use nrf24_dc::device::radio::{CrcLength, DataRate, Nrf24, CHANNEL_COUNT};
use nrf24_dc::time::Clock;
use nrf24_dc::{ClientId, DcServer, ServerConfig};

/// Time on air of one packet, acknowledgment included.
pub const AIRTIME: Duration = Duration::from_micros(200);
/// Default delay between a delivered packet and the peer's answer being readable.
pub const TURNAROUND: Duration = Duration::from_micros(300);

pub type SimServer<'k> = DcServer<'k, SimRadio, SimError, SimClock>;

#[derive(Debug, Clone)]
pub struct SimClock {
    base: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Auto-ack ran out of retries.
    MaxRetries,
}

#[derive(Debug, Default, Clone)]
pub struct SimInfo;

impl ReceiveInfo for SimInfo {
    fn rssi(&self) -> i16 {
        -40
    }
}

/// What a simulated client knows and what it saw.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub id: ClientId,
    pub reachable: bool,
    pub broadcast_channel: u8,
    pub session_channel: Option<u8>,
    /// Answers `Data` with the decrypted payload it got instead of `reply`.
    pub echo: bool,
    pub reply: Vec<u8>,
    pub reply_delay: Duration,
    pub key: Option<Vec<u8>>,
    pub lookups_answered: usize,
    pub census_timeouts: Vec<u16>,
    pub received: Vec<Vec<u8>>,
    pub keep_alives: usize,
    pub end_tags: usize,
}

impl PeerState {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            reachable: true,
            broadcast_channel: ServerConfig::default().broadcast_channel,
            session_channel: None,
            echo: false,
            reply: Vec::new(),
            reply_delay: TURNAROUND,
            key: None,
            lookups_answered: 0,
            census_timeouts: Vec::new(),
            received: Vec::new(),
            keep_alives: 0,
            end_tags: 0,
        }
    }

    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn replying(mut self, reply: &[u8]) -> Self {
        self.reply = reply.to_vec();
        self
    }

    /// Answers only `delay` after the frame was delivered.
    pub fn answering_after(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn with_key(mut self, key: &[u8]) -> Self {
        self.key = Some(key.to_vec());
        self
    }

    fn listens_on(&self, channel: u8) -> bool {
        channel == self.broadcast_channel || self.session_channel == Some(channel)
    }

    fn crypt(&self, bytes: &mut [u8]) {
        if let Some(key) = &self.key {
            apply_keystream(key, bytes);
        }
    }
}

struct AnswerLookup;

impl Command<PeerState> for AnswerLookup {
    fn can_handle(&self, tag: Tag) -> bool {
        tag == Tag::Lookup || tag == Tag::WhoIsThere
    }

    fn process(&mut self, ctx: &mut PeerState, frame: &Frame<'_>) -> Option<Vec<u8>> {
        match frame {
            Frame::WhoIsThere { timeout_ms } => {
                ctx.census_timeouts.push(*timeout_ms);
                None
            }
            Frame::Lookup { id } if *id == ctx.id => {
                ctx.lookups_answered += 1;
                Frame::Lookup { id: ctx.id }.to_bytes().ok()
            }
            _ => None,
        }
    }
}

struct FollowSession;

impl Command<PeerState> for FollowSession {
    fn can_handle(&self, tag: Tag) -> bool {
        matches!(tag, Tag::StartSession | Tag::KeepAlive | Tag::EndSession)
    }

    fn process(&mut self, ctx: &mut PeerState, frame: &Frame<'_>) -> Option<Vec<u8>> {
        match frame {
            Frame::StartSession { channel, .. } => ctx.session_channel = Some(*channel),
            Frame::KeepAlive => ctx.keep_alives += 1,
            Frame::EndSession => {
                ctx.end_tags += 1;
                ctx.session_channel = None;
            }
            _ => {}
        }
        None
    }
}

struct ExchangeData;

impl Command<PeerState> for ExchangeData {
    fn can_handle(&self, tag: Tag) -> bool {
        tag == Tag::Data
    }

    fn process(&mut self, ctx: &mut PeerState, frame: &Frame<'_>) -> Option<Vec<u8>> {
        let Frame::Data { id, payload } = frame else {
            return None;
        };
        if *id != ctx.id {
            return None;
        }
        let mut plain = payload.to_vec();
        ctx.crypt(&mut plain);
        let mut reply = if ctx.echo { plain.clone() } else { ctx.reply.clone() };
        ctx.received.push(plain);
        ctx.crypt(&mut reply);
        Frame::Data {
            id: ctx.id,
            payload: &reply,
        }
        .to_bytes()
        .ok()
    }
}

pub struct SimPeer {
    pub state: PeerState,
    commands: CommandSet<PeerState>,
}

impl SimPeer {
    pub fn new(state: PeerState) -> Self {
        let mut commands = CommandSet::new();
        commands
            .add_command(AnswerLookup)
            .add_command(FollowSession)
            .add_command(ExchangeData);
        Self { state, commands }
    }
}

/// Frame sent by the server, as seen on air.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub channel: u8,
    pub pipe: u64,
    pub bytes: Vec<u8>,
    pub at: Duration,
}

struct Medium {
    network: u32,
    peers: Vec<SimPeer>,
    noisy: [bool; CHANNEL_COUNT],
    sent: Vec<SentFrame>,
}

pub struct SimNetwork {
    pub clock: SimClock,
    medium: Rc<RefCell<Medium>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            clock: SimClock::new(),
            medium: Rc::new(RefCell::new(Medium {
                network: ServerConfig::default().network_address,
                peers: Vec::new(),
                noisy: [false; CHANNEL_COUNT],
                sent: Vec::new(),
            })),
        }
    }

    pub fn add_peer(&self, state: PeerState) {
        self.medium.borrow_mut().peers.push(SimPeer::new(state));
    }

    pub fn set_noisy(&self, channels: impl IntoIterator<Item = u8>) {
        let mut medium = self.medium.borrow_mut();
        for channel in channels {
            medium.noisy[channel as usize] = true;
        }
    }

    pub fn peer(&self, id: ClientId) -> Option<PeerState> {
        self.medium
            .borrow()
            .peers
            .iter()
            .find(|peer| peer.state.id == id)
            .map(|peer| peer.state.clone())
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.medium.borrow().sent.clone()
    }

    pub fn radio(&self) -> SimRadio {
        SimRadio {
            clock: self.clock.clone(),
            medium: Rc::clone(&self.medium),
            channel: 0,
            auto_ack: false,
            writing_pipe: 0,
            rx: Vec::new(),
            tx_outcome: None,
            power: 0,
        }
    }

    /// Server wired to this network, initialized.
    pub fn server<'k>(&self, config: ServerConfig) -> SimServer<'k> {
        let mut server = DcServer::with_clock(self.radio(), self.clock.clone(), config);
        assert!(server.init());
        server
    }
}

pub struct SimRadio {
    clock: SimClock,
    medium: Rc<RefCell<Medium>>,
    channel: u8,
    auto_ack: bool,
    writing_pipe: u64,
    /// Packets heading to the server, ordered by arrival time.
    rx: Vec<Arrival>,
    tx_outcome: Option<Result<(), SimError>>,
    pub power: i8,
}

struct Arrival {
    at: Duration,
    channel: u8,
    bytes: Vec<u8>,
}

impl SimRadio {
    pub fn channel(&self) -> u8 {
        self.channel
    }

    fn schedule(&mut self, arrival: Arrival) {
        let position = self.rx.partition_point(|queued| queued.at <= arrival.at);
        self.rx.insert(position, arrival);
    }

    /// Drops arrived packets sent on another channel, the radio was not listening there.
    fn drop_foreign(&mut self) {
        let now = self.clock.elapsed();
        let channel = self.channel;
        self.rx
            .retain(|arrival| arrival.at > now || arrival.channel == channel);
    }
}

impl Transmit for SimRadio {
    type Error = SimError;

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.clock.advance(AIRTIME);
        let now = self.clock.elapsed();
        let mut medium = self.medium.borrow_mut();
        medium.sent.push(SentFrame {
            channel: self.channel,
            pipe: self.writing_pipe,
            bytes: data.to_vec(),
            at: now,
        });

        let broadcast = broadcast_address(medium.network);
        let network = medium.network;
        let mut acked = false;
        let mut replies = Vec::new();
        for peer in medium.peers.iter_mut() {
            let state = &peer.state;
            if !state.reachable || !state.listens_on(self.channel) {
                continue;
            }
            let unicast = self.writing_pipe == client_address(network, state.id);
            if self.writing_pipe != broadcast && !unicast {
                continue;
            }
            acked |= unicast;
            if let Ok(Dispatch::Handled { reply: Some(reply) }) =
                peer.commands.dispatch(&mut peer.state, data)
            {
                replies.push(Arrival {
                    at: now + peer.state.reply_delay,
                    channel: self.channel,
                    bytes: reply,
                });
            }
        }
        drop(medium);
        for reply in replies {
            self.schedule(reply);
        }
        self.tx_outcome = Some(if self.auto_ack && !acked {
            Err(SimError::MaxRetries)
        } else {
            Ok(())
        });
        Ok(())
    }

    fn check_transmit(&mut self) -> Result<bool, Self::Error> {
        match self.tx_outcome.take() {
            Some(Ok(())) => Ok(true),
            Some(Err(err)) => Err(err),
            None => Ok(false),
        }
    }
}

impl Receive for SimRadio {
    type Error = SimError;
    type Info = SimInfo;

    fn start_receive(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn check_receive(&mut self, _restart: bool) -> Result<bool, Self::Error> {
        self.drop_foreign();
        let now = self.clock.elapsed();
        Ok(self.rx.first().map_or(false, |arrival| arrival.at <= now))
    }

    fn get_received(&mut self, buff: &mut [u8]) -> Result<(usize, Self::Info), Self::Error> {
        self.drop_foreign();
        let now = self.clock.elapsed();
        match self.rx.first() {
            Some(arrival) if arrival.at <= now => {
                let bytes = self.rx.remove(0).bytes;
                let size = bytes.len().min(buff.len());
                buff[..size].copy_from_slice(&bytes[..size]);
                Ok((size, SimInfo))
            }
            _ => Ok((0, SimInfo)),
        }
    }
}

impl Power for SimRadio {
    type Error = SimError;

    fn set_power(&mut self, power: i8) -> Result<(), Self::Error> {
        self.power = power;
        Ok(())
    }
}

impl Channel for SimRadio {
    type Channel = u8;
    type Error = SimError;

    fn set_channel(&mut self, channel: &u8) -> Result<(), Self::Error> {
        self.channel = *channel;
        Ok(())
    }
}

impl Nrf24 for SimRadio {
    type Error = SimError;

    fn set_address_width(&mut self, _width: u8) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_retries(&mut self, _delay: u8, _count: u8) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_crc_length(&mut self, _crc: CrcLength) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_data_rate(&mut self, _rate: DataRate) -> Result<(), Self::Error> {
        Ok(())
    }

    fn enable_dynamic_payloads(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_auto_ack(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.auto_ack = enabled;
        Ok(())
    }

    fn open_writing_pipe(&mut self, address: u64) -> Result<(), Self::Error> {
        self.writing_pipe = address;
        Ok(())
    }

    fn open_reading_pipe(&mut self, _pipe: u8, _address: u64) -> Result<(), Self::Error> {
        Ok(())
    }

    fn flush_rx(&mut self) -> Result<(), Self::Error> {
        let now = self.clock.elapsed();
        self.rx.retain(|arrival| arrival.at > now);
        Ok(())
    }

    fn carrier_detected(&mut self) -> Result<bool, Self::Error> {
        Ok(self.medium.borrow().noisy[self.channel as usize])
    }
}

impl DelayMs<u32> for SimRadio {
    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(Duration::from_millis(ms as u64));
    }
}

impl DelayUs<u32> for SimRadio {
    fn delay_us(&mut self, us: u32) {
        self.clock.advance(Duration::from_micros(us as u64));
    }
}
