use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::metrics::{ROLLUP_LATENCY_SECONDS, ROLLUP_PENDING, ROLLUP_QUEUE_FULL_TOTAL};
use crate::model::{AggWindow, Id};
use crate::rollup::refresh;
use crate::store::TimeSeriesStore;

/// A week of one sensor's rollups that needs recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirtyWeek {
    pub sensor_id: Id,
    pub week_start: DateTime<Utc>,
}

impl DirtyWeek {
    pub fn containing(sensor_id: Id, ts: DateTime<Utc>) -> Self {
        Self {
            sensor_id,
            week_start: AggWindow::Week.bucket_start(ts),
        }
    }
}

/// Sending half handed to request handlers. Never blocks a request.
#[derive(Debug, Clone)]
pub struct RollupQueue {
    tx: mpsc::Sender<DirtyWeek>,
}

impl RollupQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DirtyWeek>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn notify(&self, sensor_id: Id, ts: DateTime<Utc>) {
        match self.tx.try_send(DirtyWeek::containing(sensor_id, ts)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dirty)) => {
                ROLLUP_QUEUE_FULL_TOTAL.inc();
                warn!(
                    "Rollup queue full, dropping notice for sensor {} week {}",
                    dirty.sensor_id, dirty.week_start
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Rollup worker stopped, ignoring notice");
            }
        }
    }
}

pub async fn run_batcher(
    mut rx: mpsc::Receiver<DirtyWeek>,
    store: Arc<dyn TimeSeriesStore>,
    max_batch: usize,
    max_wait_ms: u64,
) {
    info!(
        "Starting rollup worker with max_batch={}, max_wait_ms={}",
        max_batch, max_wait_ms
    );

    let mut pending: BTreeSet<DirtyWeek> = BTreeSet::new();
    let mut ticker = interval(Duration::from_millis(max_wait_ms));

    loop {
        tokio::select! {
            dirty = rx.recv() => {
                match dirty {
                    Some(dirty) => {
                        pending.insert(dirty);
                        ROLLUP_PENDING.set(pending.len() as f64);

                        if pending.len() >= max_batch {
                            flush_batch(store.as_ref(), &mut pending).await;
                        }
                    }
                    None => {
                        info!("Channel closed, flushing remaining rollups");
                        flush_batch(store.as_ref(), &mut pending).await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush_batch(store.as_ref(), &mut pending).await;
                }
            }
        }
    }

    info!("Rollup worker stopped");
}

async fn flush_batch(store: &dyn TimeSeriesStore, pending: &mut BTreeSet<DirtyWeek>) {
    let batch_len = pending.len();
    if batch_len == 0 {
        return;
    }

    debug!("Refreshing {} dirty rollup weeks", batch_len);
    let start = Instant::now();
    let mut failed = 0;

    for dirty in std::mem::take(pending) {
        // Each notice covers exactly one week.
        if let Err(e) = refresh(store, dirty.sensor_id, dirty.week_start, dirty.week_start).await {
            failed += 1;
            error!(
                "Failed to refresh rollups for sensor {} week {}: {}",
                dirty.sensor_id, dirty.week_start, e
            );
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    ROLLUP_LATENCY_SECONDS.observe(elapsed);
    ROLLUP_PENDING.set(0.0);
    if failed > 0 {
        warn!(
            "Rollup batch finished with {}/{} failures in {:.3}s",
            failed, batch_len, elapsed
        );
    } else {
        debug!("Rollup batch refreshed in {:.3}s", elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTimeSeries;
    use crate::model::ScalarDataPoint;
    use crate::store::DataFilter;
    use chrono::TimeZone;

    #[test]
    fn test_dirty_week_alignment() {
        let ts = Utc.with_ymd_and_hms(2013, 1, 1, 5, 0, 0).unwrap();
        let dirty = DirtyWeek::containing(4, ts);
        assert_eq!(
            dirty.week_start,
            Utc.with_ymd_and_hms(2012, 12, 27, 0, 0, 0).unwrap()
        );
        assert_eq!(dirty, DirtyWeek::containing(4, ts + chrono::Duration::days(1)));
    }

    #[test]
    fn test_full_queue_drops_notice() {
        let (queue, mut rx) = RollupQueue::channel(1);
        let ts = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
        queue.notify(1, ts);
        queue.notify(2, ts);
        assert_eq!(rx.try_recv().unwrap().sensor_id, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_batcher_flushes_on_close() {
        tokio_test::block_on(async {
            let series = Arc::new(MemoryTimeSeries::new());
            let ts = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
            series
                .post_data(&ScalarDataPoint {
                    site_id: 1,
                    device_id: 1,
                    sensor_id: 9,
                    timestamp: ts,
                    value: 3.5,
                })
                .await
                .unwrap();

            let (queue, rx) = RollupQueue::channel(16);
            queue.notify(9, ts);
            queue.notify(9, ts);
            drop(queue);

            run_batcher(rx, series.clone(), 100, 60_000).await;

            let daily = series
                .get_aggregates(AggWindow::Day, &DataFilter::sensor(9))
                .await
                .unwrap();
            assert_eq!(daily.len(), 1);
            assert_eq!(daily[0].count, 1);
            assert_eq!(daily[0].mean, 3.5);
        });
    }
}
