//! Channel activity sampling and free channel selection.
//!
//! An nRF24 channel is 1 MHz wide but a 1-2 Mbps transmission spills over the
//! neighboring channels. A channel is only accepted as work channel when it is quiet
//! and its `guard_radius` neighbors on both sides are quiet too.
use log::{debug, info, warn};
use std::fmt::Debug;
use std::time::Duration;

use crate::device::radio::{Radio, CHANNEL_COUNT};
use crate::server::DcServer;
use crate::time::Clock;

/// How neighbors past the band edges are treated by the guard band check.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Nothing lives past the band edges: missing neighbors count as free.
    #[default]
    Clamp,
    /// The band wraps: channel 0 neighbors channel `CHANNEL_COUNT - 1`.
    Wrap,
}

impl EdgePolicy {
    /// Number of channel steps between `a` and `b`, going around the band when it wraps.
    pub fn distance(self, a: u8, b: u8) -> u8 {
        let direct = a.abs_diff(b);
        match self {
            EdgePolicy::Clamp => direct,
            EdgePolicy::Wrap => direct.min((CHANNEL_COUNT as u8).saturating_sub(direct)),
        }
    }
}

/// Parameters of a channel scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Number of sweeps over the whole band.
    pub passes: u8,
    /// Listening time per channel and sweep.
    pub dwell: Duration,
    /// Neighbors required free on each side of a candidate.
    pub guard_radius: u8,
    pub edges: EdgePolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            passes: 4,
            dwell: Duration::from_micros(130), // RPD needs 128us of listening to settle
            guard_radius: 2,
            edges: EdgePolicy::Clamp,
        }
    }
}

/// Carrier hits per channel collected by the last scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelActivity {
    hits: [u8; CHANNEL_COUNT],
}

impl Default for ChannelActivity {
    fn default() -> Self {
        Self {
            hits: [0; CHANNEL_COUNT],
        }
    }
}

impl ChannelActivity {
    pub fn clear(&mut self) {
        self.hits = [0; CHANNEL_COUNT];
    }

    pub fn record(&mut self, channel: u8, busy: bool) {
        if let Some(hits) = self.hits.get_mut(channel as usize) {
            if busy {
                *hits = hits.saturating_add(1);
            }
        }
    }

    /// Number of sweeps that saw a carrier on `channel`.
    pub fn hits(&self, channel: u8) -> u8 {
        self.hits.get(channel as usize).copied().unwrap_or(0)
    }

    /// Channels outside the band are never usable, so they report busy.
    pub fn is_busy(&self, channel: u8) -> bool {
        match self.hits.get(channel as usize) {
            Some(hits) => *hits > 0,
            None => true,
        }
    }

    pub fn busy_count(&self) -> usize {
        self.hits.iter().filter(|hits| **hits > 0).count()
    }

    pub fn is_free_radius(&self, channel: u8, radius: u8, edges: EdgePolicy) -> bool {
        if self.is_busy(channel) {
            return false;
        }
        let count = CHANNEL_COUNT as i32;
        (1..=radius as i32).all(|distance| {
            [channel as i32 - distance, channel as i32 + distance]
                .into_iter()
                .all(|neighbor| match edges {
                    EdgePolicy::Clamp if !(0..count).contains(&neighbor) => true,
                    EdgePolicy::Clamp => !self.is_busy(neighbor as u8),
                    EdgePolicy::Wrap => !self.is_busy(neighbor.rem_euclid(count) as u8),
                })
        })
    }

    /// First channel, lowest first, that is free within `radius` and not excluded.
    pub fn first_free(
        &self,
        radius: u8,
        edges: EdgePolicy,
        excluded: impl Fn(u8) -> bool,
    ) -> Option<u8> {
        (0..CHANNEL_COUNT as u8)
            .filter(|channel| !excluded(*channel))
            .find(|channel| self.is_free_radius(*channel, radius, edges))
    }
}

impl<'k, T, E, Cl> DcServer<'k, T, E, Cl>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    /// Sweeps the band and rebuilds the activity table.
    ///
    /// A channel the radio fails to tune to is recorded busy.
    pub fn scan_channels(&mut self) {
        let scan = self.config.scan;
        self.activity.clear();
        for _ in 0..scan.passes {
            for channel in 0..CHANNEL_COUNT as u8 {
                match self.transport.sense_carrier(channel, scan.dwell) {
                    Ok(busy) => self.activity.record(channel, busy),
                    Err(err) => {
                        warn!("Channel {} could not be sampled: {}", channel, err);
                        self.activity.record(channel, true);
                    }
                }
            }
        }
        debug!(
            "Scan done: {}/{} channels busy.",
            self.activity.busy_count(),
            CHANNEL_COUNT
        );
    }

    /// Whether `channel` showed activity during the last scan.
    pub fn is_channel_busy(&self, channel: u8) -> bool {
        self.activity.is_busy(channel)
    }

    pub fn is_channel_free_radius(&self, channel: u8, radius: u8) -> bool {
        self.activity
            .is_free_radius(channel, radius, self.config.scan.edges)
    }

    /// Scans, then picks the first isolated channel.
    ///
    /// The broadcast channel and its guard band are never candidates, our own
    /// broadcasts would leak into the session otherwise.
    pub fn look_for_free_channel(&mut self) -> Option<u8> {
        self.scan_channels();
        let radius = self.config.scan.guard_radius;
        let broadcast = self.config.broadcast_channel;
        let edges = self.config.scan.edges;
        let channel = self.activity.first_free(radius, edges, |channel| {
            edges.distance(channel, broadcast) <= radius
        });
        match channel {
            Some(channel) => debug!("Free channel found: {}", channel),
            None => warn!("No free channel with a guard band of {}.", radius),
        }
        channel
    }

    /// Scans and logs the activity of every channel.
    pub fn test_channel(&mut self) -> &ChannelActivity {
        self.scan_channels();
        for chunk in (0..CHANNEL_COUNT as u8).collect::<Vec<_>>().chunks(32) {
            let line: String = chunk
                .iter()
                .map(|channel| match self.activity.hits(*channel) {
                    0 => '-',
                    hits if hits < 10 => (b'0' + hits) as char,
                    _ => '#',
                })
                .collect();
            info!("ch {:>3}..{:>3} {}", chunk[0], chunk[chunk.len() - 1], line);
        }
        &self.activity
    }
}
