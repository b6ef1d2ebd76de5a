//! Storage collaborators: the relational entity store and the time-series store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::{
    AggWindow, AggregateBucket, Device, Id, Metadata, NewDevice, NewMetadata, NewSensor, NewSite,
    OwnerRef, ScalarDataPoint, Sensor, Site,
};
use crate::pagination::{Page, Window};

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_site(&self, site: NewSite) -> Result<Site>;
    async fn get_site(&self, id: Id) -> Result<Option<Site>>;
    /// Replaces the stored site; `None` if it does not exist.
    async fn update_site(&self, site: &Site) -> Result<Option<Site>>;
    async fn list_sites(&self, window: Window) -> Result<Page<Site>>;

    async fn create_device(&self, device: NewDevice) -> Result<Device>;
    async fn get_device(&self, id: Id) -> Result<Option<Device>>;
    async fn update_device(&self, device: &Device) -> Result<Option<Device>>;
    async fn list_devices(&self, site: Option<Id>, window: Window) -> Result<Page<Device>>;

    async fn create_sensor(&self, sensor: NewSensor) -> Result<Sensor>;
    async fn get_sensor(&self, id: Id) -> Result<Option<Sensor>>;
    async fn update_sensor(&self, sensor: &Sensor) -> Result<Option<Sensor>>;
    async fn list_sensors(&self, device: Option<Id>, window: Window) -> Result<Page<Sensor>>;
    /// Moves a sensor's current value forward; older readings are ignored.
    async fn record_reading(&self, sensor: Id, value: f64, at: DateTime<Utc>) -> Result<()>;

    async fn create_metadata(&self, metadata: NewMetadata) -> Result<Metadata>;
    async fn get_metadata(&self, id: Id) -> Result<Option<Metadata>>;
    /// The most recent record per key for `owner`, ordered by key.
    async fn latest_metadata(&self, owner: OwnerRef) -> Result<Vec<Metadata>>;
}

/// Selects one sensor's readings in the half-open range `[gte, lt)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataFilter {
    pub sensor_id: Id,
    pub gte: Option<DateTime<Utc>>,
    pub lt: Option<DateTime<Utc>>,
}

impl DataFilter {
    pub fn sensor(sensor_id: Id) -> Self {
        Self {
            sensor_id,
            gte: None,
            lt: None,
        }
    }

    pub fn between(sensor_id: Id, gte: DateTime<Utc>, lt: DateTime<Utc>) -> Self {
        Self {
            sensor_id,
            gte: Some(gte),
            lt: Some(lt),
        }
    }

    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.gte.unwrap_or(DateTime::<Utc>::MIN_UTC),
            self.lt.unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    pub fn is_empty(&self) -> bool {
        let (gte, lt) = self.bounds();
        gte >= lt
    }
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Appends one tagged point and reports whether it was stored. A second
    /// write for the same sensor and timestamp leaves the first in place and
    /// returns `false`.
    async fn post_data(&self, point: &ScalarDataPoint) -> Result<bool>;

    /// Persists each point on its own; one failure does not affect the others.
    async fn post_batch(&self, points: &[ScalarDataPoint]) -> Vec<Result<bool>> {
        let mut results = Vec::with_capacity(points.len());
        for point in points {
            results.push(self.post_data(point).await);
        }
        results
    }

    /// Raw readings ordered by timestamp.
    async fn get_sensor_data(&self, filter: &DataFilter) -> Result<Vec<ScalarDataPoint>>;

    /// Stored rollup buckets ordered by bucket start.
    async fn get_aggregates(
        &self,
        window: AggWindow,
        filter: &DataFilter,
    ) -> Result<Vec<AggregateBucket>>;

    /// Replaces every bucket of `window` for the sensor whose start lies in
    /// `[from, to)` with `buckets`.
    async fn store_aggregates(
        &self,
        window: AggWindow,
        sensor_id: Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        buckets: &[AggregateBucket],
    ) -> Result<()>;
}
