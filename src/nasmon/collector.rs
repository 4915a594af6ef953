// Nasmon - NAS enclosure and disk statistics agent
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::disk::{DiskError, DiskErrorKind, FilesystemSnapshotBuilder, Filesystems};
use crate::sensor::{
    Channel, PowerMonitor, SensorError, SensorErrorKind, TemperatureHumidity, TemperatureHumidityPressure,
};
use crate::snapshot::{ChannelReading, Environment, Power, Snapshot};
use crate::system::OsStatsSource;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tokio::task;
use tracing::{Instrument, Level};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_STALE_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_READY_POLL: Duration = Duration::from_millis(100);

// Added to the previous snapshot time when the wall clock has stepped backwards
const CLOCK_STEP: Duration = Duration::from_millis(1);

/// Source of the current time, used to timestamp snapshots and decide when a
/// cached snapshot has expired.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Clock that uses the system wall time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// How long a snapshot is served from the cache before sensors are polled again.
    pub cache_ttl: Duration,
    /// How old a snapshot may be and still be served after a failed poll.
    pub stale_grace: Duration,
    /// Maximum time to wait for the power monitor to finish a conversion cycle. A
    /// full cycle across all channels takes about 6.3 seconds.
    pub ready_timeout: Duration,
    /// Time between checks of the power monitor ready flag.
    pub ready_poll: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            cache_ttl: DEFAULT_CACHE_TTL,
            stale_grace: DEFAULT_STALE_GRACE,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            ready_poll: DEFAULT_READY_POLL,
        }
    }
}

/// Hardware read during each poll. Sensors that couldn't be initialized at startup
/// are absent. Without the primary temperature and humidity sensor no snapshot is
/// produced at all.
#[derive(Default)]
pub struct Sensors {
    pub climate: Option<Box<dyn TemperatureHumidity>>,
    pub climate_secondary: Option<Box<dyn TemperatureHumidityPressure>>,
    pub power: Option<Box<dyn PowerMonitor>>,
    pub os: Option<Box<dyn OsStatsSource>>,
}

impl fmt::Debug for Sensors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensors")
            .field("climate", &self.climate.is_some())
            .field("climate_secondary", &self.climate_secondary.is_some())
            .field("power", &self.power.is_some())
            .field("os", &self.os.is_some())
            .finish()
    }
}

/// Result of asking for the current stats.
#[derive(Debug, Clone, PartialEq)]
pub enum Stats {
    /// Snapshot from a poll that completed within the cache TTL.
    Fresh(Arc<Snapshot>),
    /// The latest poll failed, this is the last good snapshot, still within the stale grace window.
    Stale(Arc<Snapshot>),
    /// Required hardware is not available so there is nothing to report.
    Unavailable,
}

impl Stats {
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Stats::Fresh(s) | Stats::Stale(s) => Some(s),
            Stats::Unavailable => None,
        }
    }
}

/// Potential kinds of errors that can be encountered polling for stats
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum CollectErrorKind {
    Retryable,
    Timeout,
    Internal,
}

impl CollectErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            CollectErrorKind::Retryable => "retryable",
            CollectErrorKind::Timeout => "timeout",
            CollectErrorKind::Internal => "internal",
        }
    }
}

/// Error polling sensors or disks for a snapshot
#[derive(Debug)]
pub enum CollectError {
    Sensor(SensorError),
    Disk(DiskError),
    KindMsg(CollectErrorKind, &'static str),
    KindMsgCause(CollectErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl CollectError {
    pub fn kind(&self) -> CollectErrorKind {
        match self {
            CollectError::Sensor(e) if e.kind() == SensorErrorKind::Timeout => CollectErrorKind::Timeout,
            CollectError::Sensor(_) => CollectErrorKind::Retryable,
            CollectError::Disk(e) if e.kind() == DiskErrorKind::Timeout => CollectErrorKind::Timeout,
            CollectError::Disk(_) => CollectErrorKind::Retryable,
            CollectError::KindMsg(kind, _) => *kind,
            CollectError::KindMsgCause(kind, _, _) => *kind,
        }
    }

    /// Finer grained label for logging: the kind of the underlying sensor or
    /// disk error when there is one.
    pub fn cause_label(&self) -> &'static str {
        match self {
            CollectError::Sensor(e) => e.kind().as_label(),
            CollectError::Disk(e) => e.kind().as_label(),
            _ => self.kind().as_label(),
        }
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Sensor(e) => write!(f, "sensor error: {}", e),
            CollectError::Disk(e) => write!(f, "disk error: {}", e),
            CollectError::KindMsg(_, msg) => msg.fmt(f),
            CollectError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for CollectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectError::Sensor(e) => Some(e),
            CollectError::Disk(e) => Some(e),
            CollectError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<SensorError> for CollectError {
    fn from(e: SensorError) -> Self {
        CollectError::Sensor(e)
    }
}

impl From<DiskError> for CollectError {
    fn from(e: DiskError) -> Self {
        CollectError::Disk(e)
    }
}

fn within(produced_at: SystemTime, now: SystemTime, window: Duration) -> bool {
    // A clock that went backwards means we can't say how old the snapshot is
    match now.duration_since(produced_at) {
        Ok(age) => age < window,
        Err(_) => false,
    }
}

/// Poll the ready flag of the power monitor until it is set or `timeout` elapses.
fn wait_until_ready(power: &mut dyn PowerMonitor, timeout: Duration, poll: Duration) -> Result<(), CollectError> {
    let deadline = Instant::now() + timeout;
    loop {
        if power.is_ready()? {
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(CollectError::KindMsg(
                CollectErrorKind::Timeout,
                "power monitor did not become ready",
            ));
        }

        thread::sleep(poll);
    }
}

fn read_channel(power: &mut dyn PowerMonitor, channel: Channel) -> Result<ChannelReading, SensorError> {
    Ok(ChannelReading {
        bus_voltage: power.bus_voltage(channel)?,
        shunt_voltage: power.shunt_voltage(channel)?,
        current: power.current(channel)?,
    })
}

fn read_power(power: &mut dyn PowerMonitor, config: &CollectorConfig) -> Result<Power, CollectError> {
    wait_until_ready(power, config.ready_timeout, config.ready_poll)?;

    Ok(Power::new(
        read_channel(power, Channel::Rpi)?,
        read_channel(power, Channel::Drive1)?,
        read_channel(power, Channel::Drive2)?,
    ))
}

#[derive(Debug)]
struct Cached {
    snapshot: Arc<Snapshot>,
    produced_at: SystemTime,
}

#[derive(Debug)]
struct State {
    sensors: Sensors,
    filesystems: FilesystemSnapshotBuilder,
    previous: Filesystems,
    cached: Option<Cached>,
}

/// Polls sensors and disks, caching the resulting snapshot for a short time.
///
/// Only a single poll runs at a time. Callers that arrive while a poll is in
/// progress wait for it and are then answered from the cache.
pub struct StatsCollector {
    state: Mutex<State>,
    clock: Box<dyn Clock>,
    config: CollectorConfig,
}

impl StatsCollector {
    pub fn new<C>(sensors: Sensors, filesystems: FilesystemSnapshotBuilder, clock: C, config: CollectorConfig) -> Self
    where
        C: Clock + 'static,
    {
        StatsCollector {
            state: Mutex::new(State {
                sensors,
                filesystems,
                previous: Filesystems::new(),
                cached: None,
            }),
            clock: Box::new(clock),
            config,
        }
    }

    /// Get the latest stats, polling hardware if the cached snapshot has expired.
    ///
    /// This blocks for as long as a poll takes (a few seconds) and must not be
    /// called from an async context without `spawn_blocking` or similar.
    pub fn get_stats(&self) -> Result<Stats, CollectError> {
        let mut state = self.state.lock().unwrap_or_else(|e| {
            // State is only replaced after a successful poll, a panic can't leave it half updated
            tracing::warn!(message = "recovering stats state after panic in another thread");
            e.into_inner()
        });

        let now = self.clock.now();
        if let Some(cached) = &state.cached {
            if within(cached.produced_at, now, self.config.cache_ttl) {
                tracing::debug!(message = "returning cached stats");
                return Ok(Stats::Fresh(cached.snapshot.clone()));
            }
        }

        // Snapshots stay ordered by time even if the wall clock steps backwards
        let produced_at = match &state.cached {
            Some(cached) if now <= cached.produced_at => cached.produced_at + CLOCK_STEP,
            _ => now,
        };

        match self.poll(&mut state, produced_at) {
            Ok(Some(snapshot)) => {
                tracing::info!(message = "collected stats", duration_secs = snapshot.collect_duration);
                let snapshot = Arc::new(snapshot);
                state.previous = snapshot.filesystems.clone();
                state.cached = Some(Cached {
                    snapshot: snapshot.clone(),
                    produced_at,
                });

                Ok(Stats::Fresh(snapshot))
            }
            Ok(None) => Ok(Stats::Unavailable),
            Err(e) => match &state.cached {
                Some(cached) if within(cached.produced_at, produced_at, self.config.stale_grace) => {
                    tracing::warn!(message = "unable to collect stats, serving stale snapshot", error = %e);
                    Ok(Stats::Stale(cached.snapshot.clone()))
                }
                _ => Err(e),
            },
        }
    }

    fn poll(&self, state: &mut State, now: SystemTime) -> Result<Option<Snapshot>, CollectError> {
        let started = Instant::now();
        let State {
            sensors,
            filesystems,
            previous,
            ..
        } = state;

        let climate = match sensors.climate.as_mut() {
            Some(climate) => climate,
            None => {
                tracing::debug!(message = "temperature sensor not initialized, no stats available");
                return Ok(None);
            }
        };

        let primary = climate.read_temperature_humidity()?;
        let secondary = match sensors.climate_secondary.as_mut() {
            Some(s) => Some(s.read_temperature_humidity_pressure()?),
            None => None,
        };

        let power = match sensors.power.as_mut() {
            Some(p) => Some(read_power(p.as_mut(), &self.config)?),
            None => None,
        };

        let filesystems = filesystems.build(previous, now)?;
        let os = sensors.os.as_mut().map(|o| o.os_stats(now));

        Ok(Some(Snapshot::new(
            now,
            started.elapsed(),
            os,
            Environment::new(primary, secondary),
            power,
            filesystems,
        )))
    }
}

impl fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsCollector").field("config", &self.config).finish()
    }
}

/// Get the latest stats from a thread where blocking is acceptable, suitable for
/// calling from async code.
pub async fn get_stats_blocking(collector: Arc<StatsCollector>) -> Result<Stats, CollectError> {
    task::spawn_blocking(move || collector.get_stats())
        .instrument(tracing::span!(Level::DEBUG, "nasmon_collect"))
        .await
        .map_err(|e| CollectError::KindMsgCause(CollectErrorKind::Internal, "stats collection task failed", Box::new(e)))?
}
