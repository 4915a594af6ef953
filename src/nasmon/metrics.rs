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

use crate::collector::{CollectError, Stats};
use crate::publish::Publish;
use crate::sensor::Channel;
use crate::snapshot::{ChannelPower, Snapshot};
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

/// Collection of Prometheus metrics updated from each periodic poll.
///
/// Enclosure temperatures are degrees fahrenheit, matching the published
/// snapshot. Drive temperatures are degrees celsius as reported by the drive.
#[derive(Clone)]
pub struct StatsMetrics {
    temperature: GaugeVec,
    humidity: GaugeVec,
    pressure: Gauge,
    bus_voltage: GaugeVec,
    current: GaugeVec,
    watts: Gauge,
    space_used: GaugeVec,
    drive_temperature: GaugeVec,
    last_collect: Gauge,
    collections: Counter,
    stale: Counter,
    errors: CounterVec,
}

impl StatsMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let temperature = GaugeVec::new(
            Opts::new("nasmon_enclosure_temperature_degrees", "Enclosure temperature in fahrenheit"),
            &["sensor"],
        )?;
        let humidity = GaugeVec::new(
            Opts::new("nasmon_enclosure_relative_humidity", "Enclosure relative humidity (0-100)"),
            &["sensor"],
        )?;
        let pressure = Gauge::new("nasmon_enclosure_pressure_hpa", "Barometric pressure in hectopascals")?;
        let bus_voltage = GaugeVec::new(
            Opts::new("nasmon_power_bus_volts", "Bus voltage by power channel"),
            &["channel"],
        )?;
        let current = GaugeVec::new(
            Opts::new("nasmon_power_current_amps", "Current by power channel"),
            &["channel"],
        )?;
        let watts = Gauge::new("nasmon_power_watts", "Total power used by all channels")?;
        let space_used = GaugeVec::new(
            Opts::new("nasmon_filesystem_used_percent", "Percent of filesystem space used"),
            &["label"],
        )?;
        let drive_temperature = GaugeVec::new(
            Opts::new(
                "nasmon_drive_temperature_celsius",
                "Drive temperature, only updated while the drive is active",
            ),
            &["label"],
        )?;
        let last_collect = Gauge::new("nasmon_last_collect_timestamp", "Timestamp of the last successful poll")?;
        let collections = Counter::new("nasmon_collections_total", "Number of attempted polls")?;
        let stale = Counter::new("nasmon_stale_total", "Number of polls answered with a stale snapshot")?;
        let errors = CounterVec::new(Opts::new("nasmon_errors_total", "Number of failed polls by type"), &["kind"])?;

        registry.register(Box::new(temperature.clone()))?;
        registry.register(Box::new(humidity.clone()))?;
        registry.register(Box::new(pressure.clone()))?;
        registry.register(Box::new(bus_voltage.clone()))?;
        registry.register(Box::new(current.clone()))?;
        registry.register(Box::new(watts.clone()))?;
        registry.register(Box::new(space_used.clone()))?;
        registry.register(Box::new(drive_temperature.clone()))?;
        registry.register(Box::new(last_collect.clone()))?;
        registry.register(Box::new(collections.clone()))?;
        registry.register(Box::new(stale.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            temperature,
            humidity,
            pressure,
            bus_voltage,
            current,
            watts,
            space_used,
            drive_temperature,
            last_collect,
            collections,
            stale,
            errors,
        })
    }

    fn set_snapshot(&self, snapshot: &Snapshot) {
        let env = &snapshot.environment;
        let readings = [
            ("1", env.temperature1, env.humidity1),
            ("2", env.temperature2, env.humidity2),
        ];

        for (sensor, temperature, humidity) in readings {
            if let Some(t) = temperature {
                self.temperature.with_label_values(&[sensor]).set(t);
            }
            if let Some(h) = humidity {
                self.humidity.with_label_values(&[sensor]).set(h);
            }
        }

        if let Some(p) = env.pressure {
            self.pressure.set(p);
        }

        if let Some(power) = &snapshot.power {
            for channel in Channel::ALL {
                self.set_channel(channel.as_label(), power.channel(channel));
            }
            self.watts.set(power.watts);
        }

        for (label, fs) in snapshot.filesystems.iter() {
            self.space_used
                .with_label_values(&[label.as_str()])
                .set(fs.space_used_percent);

            if let Some(t) = fs.temperature_current {
                self.drive_temperature.with_label_values(&[label.as_str()]).set(t as f64);
            }
        }

        self.last_collect.set(snapshot.timestamp_epoch);
    }

    fn set_channel(&self, channel: &str, power: &ChannelPower) {
        self.bus_voltage.with_label_values(&[channel]).set(power.bus_voltage);
        self.current.with_label_values(&[channel]).set(power.current);
    }
}

impl Publish for StatsMetrics {
    fn update(&self, result: &Result<Stats, CollectError>) {
        self.collections.inc();

        match result {
            Ok(Stats::Fresh(snapshot)) => self.set_snapshot(snapshot),
            Ok(Stats::Stale(_)) => self.stale.inc(),
            Ok(Stats::Unavailable) => {}
            Err(e) => self.errors.with_label_values(&[e.kind().as_label()]).inc(),
        }
    }
}

/// Wrapper that exposes metrics from a Prometheus registry in the text exposition format.
#[derive(Debug, Clone)]
pub struct MetricsExposition {
    registry: Registry,
}

impl MetricsExposition {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Gather all metrics from the registry and encode them in the Prometheus text
    /// exposition format.
    pub fn encoded_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        tracing::debug!(
            message = "encoding metric families to text exposition format",
            num_metrics = metric_families.len(),
        );

        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod test {
    use super::{MetricsExposition, StatsMetrics};
    use crate::collector::{CollectError, CollectErrorKind, Stats};
    use crate::publish::Publish;
    use crate::test::{fake_collector, FakeClimate};
    use prometheus::Registry;

    fn exposition(metrics: &StatsMetrics, registry: &Registry, result: &Result<Stats, CollectError>) -> String {
        metrics.update(result);
        let buf = MetricsExposition::new(registry.clone()).encoded_text().unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_update_from_snapshot() {
        let registry = Registry::new();
        let metrics = StatsMetrics::new(&registry).unwrap();
        let collector = fake_collector(Some(FakeClimate::new()));

        let text = exposition(&metrics, &registry, &collector.get_stats());

        assert!(text.contains("nasmon_power_watts 18.4"));
        assert!(text.contains("nasmon_power_bus_volts{channel=\"rpi\"} 5.1"));
        assert!(text.contains("nasmon_power_current_amps{channel=\"drive2\"} 1.2"));
        assert!(text.contains("nasmon_enclosure_temperature_degrees{sensor=\"1\"} 74"));
        assert!(text.contains("nasmon_enclosure_pressure_hpa 1006.53"));
        assert!(text.contains("nasmon_filesystem_used_percent{label=\"data1\"} 25"));
        assert!(text.contains("nasmon_collections_total 1"));
    }

    #[test]
    fn test_update_from_error() {
        let registry = Registry::new();
        let metrics = StatsMetrics::new(&registry).unwrap();
        let err = Err(CollectError::KindMsg(CollectErrorKind::Timeout, "power monitor did not become ready"));

        let text = exposition(&metrics, &registry, &err);

        assert!(text.contains("nasmon_errors_total{kind=\"timeout\"} 1"));
        assert!(!text.contains("nasmon_power_watts 18.4"));
    }

    #[test]
    fn test_register_twice() {
        let registry = Registry::new();
        StatsMetrics::new(&registry).unwrap();

        assert!(StatsMetrics::new(&registry).is_err());
    }
}
