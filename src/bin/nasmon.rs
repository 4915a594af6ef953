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

use clap::Parser;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use nasmon::collector::{
    CollectorConfig, Sensors, StatsCollector, SystemClock, DEFAULT_CACHE_TTL, DEFAULT_READY_POLL,
    DEFAULT_READY_TIMEOUT, DEFAULT_STALE_GRACE,
};
use nasmon::disk::{
    FilesystemSnapshotBuilder, Lsblk, SmartCtl, SmartRetry, SystemDiskStats, LSBLK_DEFAULT_PROGRAM,
    SMARTCTL_DEFAULT_PROGRAM,
};
use nasmon::http::{http_route, RequestContext, DEFAULT_REQUEST_TIMEOUT};
use nasmon::metrics::{MetricsExposition, StatsMetrics};
use nasmon::publish::{run_publisher, LogPublisher, Publish, DEFAULT_PUBLISH_INTERVAL};
use nasmon::sensor::{
    open_bus, Bme280, Ina3221, PowerMonitor, Si7021, TemperatureHumidity, TemperatureHumidityPressure,
    BME280_DEFAULT_ADDRESS, DEFAULT_SHUNT_OHMS, INA3221_DEFAULT_ADDRESS, SI7021_DEFAULT_ADDRESS,
};
use nasmon::system::{OsStatsSource, SystemOsStats};
use prometheus::process_collector::ProcessCollector;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9782);
const DEFAULT_I2C_BUS: u8 = 1;
const DEFAULT_INIT_ATTEMPTS: u32 = 30;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;
const INIT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Parse an I2C address given as hex (`0x40`) or decimal (`64`).
fn parse_address(s: &str) -> Result<u16, String> {
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };

    res.map_err(|e| format!("invalid I2C address '{}': {}", s, e))
}

/// Expose NAS enclosure sensor readings and disk statistics over HTTP
///
/// Read enclosure temperature, humidity, and pressure along with the power used
/// by a Raspberry PI and its drives from sensors on the I2C bus. Combine them with
/// filesystem usage, disk activity, and drive temperatures into a single snapshot
/// served as JSON and published periodically.
///
/// Drive temperatures are only read from drives that have been active since the
/// previous poll so that idle drives are not woken up.
#[derive(Debug, Clone, Parser)]
#[clap(name = "nasmon", version = clap::crate_version!())]
struct NasmonApplication {
    /// Poll sensors and publish stats at this interval, in seconds
    #[arg(long, default_value_t = DEFAULT_PUBLISH_INTERVAL.as_secs())]
    refresh_secs: u64,

    /// Serve a snapshot from cache for this many seconds before polling sensors again
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs())]
    cache_ttl_secs: u64,

    /// After a failed poll, serve the last snapshot if it is at most this many seconds old
    #[arg(long, default_value_t = DEFAULT_STALE_GRACE.as_secs())]
    stale_grace_secs: u64,

    /// Maximum time to wait for the power monitor to be ready, in milliseconds
    #[arg(long, default_value_t = DEFAULT_READY_TIMEOUT.as_millis() as u64)]
    ready_timeout_ms: u64,

    /// Maximum time an HTTP request waits for stats, in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout_secs: u64,

    /// I2C bus number the sensors are connected to
    #[arg(long, default_value_t = DEFAULT_I2C_BUS)]
    i2c_bus: u8,

    /// Address of the Si7021 temperature and humidity sensor
    #[arg(long, default_value_t = SI7021_DEFAULT_ADDRESS, value_parser = parse_address)]
    si7021_address: u16,

    /// Address of the BME280 temperature, humidity, and pressure sensor
    #[arg(long, default_value_t = BME280_DEFAULT_ADDRESS, value_parser = parse_address)]
    bme280_address: u16,

    /// Address of the INA3221 power monitor
    #[arg(long, default_value_t = INA3221_DEFAULT_ADDRESS, value_parser = parse_address)]
    ina3221_address: u16,

    /// Resistance of the INA3221 shunt resistors, in ohms
    #[arg(long, default_value_t = DEFAULT_SHUNT_OHMS)]
    shunt_ohms: f64,

    /// Number of attempts to initialize the Si7021 sensor, two seconds apart
    #[arg(long, default_value_t = DEFAULT_INIT_ATTEMPTS)]
    init_attempts: u32,

    /// Path to the smartctl binary
    #[arg(long, default_value = SMARTCTL_DEFAULT_PROGRAM)]
    smartctl: String,

    /// Path to the lsblk binary
    #[arg(long, default_value = LSBLK_DEFAULT_PROGRAM)]
    lsblk: String,

    /// Kill smartctl or lsblk if they run longer than this, in milliseconds
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT_MS)]
    command_timeout_ms: u64,

    /// Check drives found not to support SMART again after this many seconds. By
    /// default, they are never checked again.
    #[arg(long)]
    smart_retry_secs: Option<u64>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, nasmon will bind to public address since
    /// the purpose is to expose stats to other machines on the network
    #[arg(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

/// Initialize each sensor, leaving out any that fail. Without the Si7021 no
/// stats are available at all but the server still runs.
fn init_sensors(opts: &NasmonApplication, started: SystemTime) -> Sensors {
    let climate = match open_bus(opts.i2c_bus, opts.si7021_address)
        .and_then(|bus| Si7021::initialize(bus, opts.init_attempts, INIT_RETRY_DELAY))
    {
        Ok(s) => Some(Box::new(s) as Box<dyn TemperatureHumidity>),
        Err(e) => {
            tracing::error!(
                message = "failed to initialize Si7021 sensor, stats will be unavailable",
                address = opts.si7021_address,
                error = %e,
            );
            None
        }
    };

    let climate_secondary = match open_bus(opts.i2c_bus, opts.bme280_address).and_then(Bme280::initialize) {
        Ok(s) => Some(Box::new(s) as Box<dyn TemperatureHumidityPressure>),
        Err(e) => {
            tracing::error!(message = "failed to initialize BME280 sensor", address = opts.bme280_address, error = %e);
            None
        }
    };

    let power = match open_bus(opts.i2c_bus, opts.ina3221_address)
        .and_then(|bus| Ina3221::initialize(bus, opts.shunt_ohms))
    {
        Ok(s) => Some(Box::new(s) as Box<dyn PowerMonitor>),
        Err(e) => {
            tracing::error!(message = "failed to initialize INA3221 sensor", address = opts.ina3221_address, error = %e);
            None
        }
    };

    Sensors {
        climate,
        climate_secondary,
        power,
        os: Some(Box::new(SystemOsStats::new(started)) as Box<dyn OsStatsSource>),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = NasmonApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let startup = Instant::now();
    let started = SystemTime::now();

    // Initializing the Si7021 may retry for up to a minute, keep it off the runtime threads
    let sensor_opts = opts.clone();
    let sensors = task::spawn_blocking(move || init_sensors(&sensor_opts, started))
        .instrument(tracing::span!(Level::DEBUG, "nasmon_init"))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize sensors", error = %e);
            process::exit(1)
        });

    let command_timeout = Duration::from_millis(opts.command_timeout_ms);
    let retry = match opts.smart_retry_secs {
        Some(secs) => SmartRetry::After(Duration::from_secs(secs)),
        None => SmartRetry::Never,
    };

    let filesystems = FilesystemSnapshotBuilder::new(
        Lsblk::new(opts.lsblk.as_str(), command_timeout),
        SystemDiskStats::new(),
        SmartCtl::new(opts.smartctl.as_str(), command_timeout),
        retry,
    );

    let config = CollectorConfig {
        cache_ttl: Duration::from_secs(opts.cache_ttl_secs),
        stale_grace: Duration::from_secs(opts.stale_grace_secs),
        ready_timeout: Duration::from_millis(opts.ready_timeout_ms),
        ready_poll: DEFAULT_READY_POLL,
    };

    let collector = Arc::new(StatsCollector::new(sensors, filesystems, SystemClock, config));

    let registry = Registry::new();
    let metrics = StatsMetrics::new(&registry).unwrap_or_else(|e| {
        tracing::error!(message = "failed to register stats metrics", error = %e);
        process::exit(1)
    });

    registry
        .register(Box::new(ProcessCollector::for_self()))
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to register process metrics", error = %e);
            process::exit(1)
        });

    // Periodically poll and publish stats. This also keeps the cache warm for HTTP requests.
    let publishers: Vec<Arc<dyn Publish>> = vec![Arc::new(LogPublisher), Arc::new(metrics)];
    task::spawn(run_publisher(
        collector.clone(),
        publishers,
        Duration::from_secs(opts.refresh_secs),
    ));

    let context = Arc::new(RequestContext::new(
        collector,
        MetricsExposition::new(registry),
        Duration::from_secs(opts.request_timeout_secs),
    ));

    let service = make_service_fn(move |_: &AddrStream| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(tracing::span!(Level::DEBUG, "nasmon_request"))
            }))
        }
    });

    let server = Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error starting server", address = %opts.bind, err = %e);
        process::exit(1)
    });

    tracing::info!(message = "starting server", address = %opts.bind);
    server
        .serve(service)
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!(message = "server shutdown", runtime_secs = %startup.elapsed().as_secs());
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
