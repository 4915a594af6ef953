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

use crate::collector::{get_stats_blocking, CollectError, Stats, StatsCollector};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

/// Destination for the outcome of each periodic poll.
pub trait Publish: Send + Sync {
    fn update(&self, result: &Result<Stats, CollectError>);
}

/// Publisher that writes each snapshot to the log as a JSON payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl Publish for LogPublisher {
    fn update(&self, result: &Result<Stats, CollectError>) {
        match result {
            Ok(Stats::Fresh(snapshot)) | Ok(Stats::Stale(snapshot)) => match serde_json::to_string(snapshot.as_ref()) {
                Ok(payload) => tracing::info!(message = "publishing stats", payload = %payload),
                Err(e) => tracing::error!(message = "unable to serialize stats", error = %e),
            },
            Ok(Stats::Unavailable) => tracing::debug!(message = "no stats available to publish"),
            Err(e) => tracing::error!(
                message = "unable to collect stats for publishing",
                kind = e.kind().as_label(),
                cause = e.cause_label(),
                error = %e,
            ),
        }
    }
}

/// Poll for stats every `interval` and hand the outcome to each publisher.
///
/// Runs until the task it is spawned on is dropped. A failed poll is passed to
/// publishers like any other outcome and does not end the loop.
pub async fn run_publisher(collector: Arc<StatsCollector>, publishers: Vec<Arc<dyn Publish>>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        let _ = interval.tick().await;
        let res = get_stats_blocking(collector.clone()).await;

        for publisher in publishers.iter() {
            publisher.update(&res);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{run_publisher, Publish};
    use crate::collector::{CollectError, Stats};
    use crate::test::{fake_collector, FakeClimate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingPublisher {
        snapshots: AtomicUsize,
        unavailable: AtomicUsize,
        errors: AtomicUsize,
    }

    impl Publish for CountingPublisher {
        fn update(&self, result: &Result<Stats, CollectError>) {
            let counter = match result {
                Ok(Stats::Fresh(_)) | Ok(Stats::Stale(_)) => &self.snapshots,
                Ok(Stats::Unavailable) => &self.unavailable,
                Err(_) => &self.errors,
            };

            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn run_for(climate: Option<FakeClimate>, publisher: Arc<CountingPublisher>) {
        let collector = Arc::new(fake_collector(climate));
        let handle = tokio::spawn(run_publisher(
            collector,
            vec![publisher as Arc<dyn Publish>],
            Duration::from_millis(40),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_publishes_snapshots() {
        let publisher = Arc::new(CountingPublisher::default());
        run_for(Some(FakeClimate::new()), publisher.clone()).await;

        assert!(publisher.snapshots.load(Ordering::SeqCst) >= 2);
        assert_eq!(0, publisher.errors.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_keeps_running_after_errors() {
        let climate = FakeClimate::new();
        climate.set_failing(true);
        let publisher = Arc::new(CountingPublisher::default());
        run_for(Some(climate), publisher.clone()).await;

        assert!(publisher.errors.load(Ordering::SeqCst) >= 2);
        assert_eq!(0, publisher.snapshots.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let publisher = Arc::new(CountingPublisher::default());
        run_for(None, publisher.clone()).await;

        assert!(publisher.unavailable.load(Ordering::SeqCst) >= 2);
    }
}
