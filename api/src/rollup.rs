//! Standing min/max/mean/count/sum rollups at hourly, daily and weekly widths.
//!
//! Hourly buckets come from raw readings; each coarser level is derived from
//! the level below it so that `count` and `sum` stay additive and the mean of
//! a coarse bucket is `sum(sum) / sum(count)` rather than a mean of means.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::errors::Result;
use crate::model::{AggWindow, AggregateBucket, Id, ScalarDataPoint};
use crate::store::{DataFilter, TimeSeriesStore};

fn fold(sensor_id: Id, window: AggWindow, start: DateTime<Utc>, first: &AggregateBucket) -> AggregateBucket {
    AggregateBucket {
        sensor_id,
        window,
        timestamp: start,
        ..first.clone()
    }
}

/// Buckets raw readings into `window`-wide bins.
pub fn rollup(points: &[ScalarDataPoint], window: AggWindow) -> Vec<AggregateBucket> {
    let mut bins: BTreeMap<DateTime<Utc>, AggregateBucket> = BTreeMap::new();
    for point in points {
        let start = window.bucket_start(point.timestamp);
        bins.entry(start)
            .and_modify(|bucket| {
                bucket.min = bucket.min.min(point.value);
                bucket.max = bucket.max.max(point.value);
                bucket.count += 1;
                bucket.sum += point.value;
            })
            .or_insert(AggregateBucket {
                sensor_id: point.sensor_id,
                window,
                timestamp: start,
                min: point.value,
                max: point.value,
                mean: point.value,
                count: 1,
                sum: point.value,
            });
    }
    finish(bins)
}

/// Merges finer buckets into `window`-wide bins.
pub fn rollup_buckets(finer: &[AggregateBucket], window: AggWindow) -> Vec<AggregateBucket> {
    let mut bins: BTreeMap<DateTime<Utc>, AggregateBucket> = BTreeMap::new();
    for bucket in finer.iter().filter(|b| b.count > 0) {
        let start = window.bucket_start(bucket.timestamp);
        bins.entry(start)
            .and_modify(|merged| {
                merged.min = merged.min.min(bucket.min);
                merged.max = merged.max.max(bucket.max);
                merged.count += bucket.count;
                merged.sum += bucket.sum;
            })
            .or_insert_with(|| fold(bucket.sensor_id, window, start, bucket));
    }
    finish(bins)
}

fn finish(bins: BTreeMap<DateTime<Utc>, AggregateBucket>) -> Vec<AggregateBucket> {
    bins.into_values()
        .map(|mut bucket| {
            bucket.mean = bucket.sum / bucket.count as f64;
            bucket
        })
        .collect()
}

/// The whole weeks covering `[from, to]`.
pub fn week_span(from: DateTime<Utc>, to: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = AggWindow::Week.bucket_start(from);
    let end = AggWindow::Week.bucket_start(to) + Duration::seconds(AggWindow::Week.seconds());
    (start, end)
}

/// Recomputes every rollup level for one sensor over the weeks touching
/// `[from, to]` and replaces the stored buckets in that span. Returns the
/// number of hourly buckets written.
pub async fn refresh(
    store: &dyn TimeSeriesStore,
    sensor_id: Id,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<usize> {
    let (start, end) = week_span(from, to);
    let points = store
        .get_sensor_data(&DataFilter::between(sensor_id, start, end))
        .await?;

    let hourly = rollup(&points, AggWindow::Hour);
    let daily = rollup_buckets(&hourly, AggWindow::Day);
    let weekly = rollup_buckets(&daily, AggWindow::Week);

    store
        .store_aggregates(AggWindow::Hour, sensor_id, start, end, &hourly)
        .await?;
    store
        .store_aggregates(AggWindow::Day, sensor_id, start, end, &daily)
        .await?;
    store
        .store_aggregates(AggWindow::Week, sensor_id, start, end, &weekly)
        .await?;

    debug!(
        "Refreshed rollups for sensor {} from {} to {}: {} points, {} hourly buckets",
        sensor_id,
        start,
        end,
        points.len(),
        hourly.len()
    );
    Ok(hourly.len())
}
