//! In-process stores used when no database is configured, and by the tests.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::{
    AggWindow, AggregateBucket, Device, Id, Metadata, NewDevice, NewMetadata, NewSensor, NewSite,
    OwnerRef, ScalarDataPoint, Sensor, Site,
};
use crate::pagination::{paginate, Page, Window};
use crate::store::{DataFilter, EntityStore, TimeSeriesStore};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// An auto-incrementing table keyed by id.
#[derive(Debug)]
struct Table<T> {
    next_id: Id,
    rows: BTreeMap<Id, T>,
}

impl<T: Clone> Table<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }

    fn insert_with(&mut self, build: impl FnOnce(Id) -> T) -> T {
        let id = self.next_id;
        self.next_id += 1;
        let row = build(id);
        self.rows.insert(id, row.clone());
        row
    }

    fn replace(&mut self, id: Id, row: &T) -> Option<T> {
        let slot = self.rows.get_mut(&id)?;
        *slot = row.clone();
        Some(row.clone())
    }

    fn page(&self, keep: impl Fn(&T) -> bool, window: Window) -> Page<T> {
        let filtered: Vec<T> = self.rows.values().filter(|row| keep(row)).cloned().collect();
        paginate(filtered, window)
    }
}

#[derive(Debug)]
struct Entities {
    sites: Table<Site>,
    devices: Table<Device>,
    sensors: Table<Sensor>,
    metadata: Table<Metadata>,
}

#[derive(Debug)]
pub struct MemoryEntityStore {
    inner: RwLock<Entities>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Entities {
                sites: Table::new(),
                devices: Table::new(),
                sensors: Table::new(),
                metadata: Table::new(),
            }),
        }
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create_site(&self, site: NewSite) -> Result<Site> {
        Ok(write(&self.inner).sites.insert_with(|id| Site {
            id,
            name: site.name,
            geo_location: site.geo_location,
            raw_zmq_stream: site.raw_zmq_stream,
        }))
    }

    async fn get_site(&self, id: Id) -> Result<Option<Site>> {
        Ok(read(&self.inner).sites.rows.get(&id).cloned())
    }

    async fn update_site(&self, site: &Site) -> Result<Option<Site>> {
        Ok(write(&self.inner).sites.replace(site.id, site))
    }

    async fn list_sites(&self, window: Window) -> Result<Page<Site>> {
        Ok(read(&self.inner).sites.page(|_| true, window))
    }

    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        Ok(write(&self.inner).devices.insert_with(|id| Device {
            id,
            site_id: device.site_id,
            name: device.name,
            active: device.active,
            description: device.description,
            building: device.building,
            floor: device.floor,
            room: device.room,
            geo_location: device.geo_location,
        }))
    }

    async fn get_device(&self, id: Id) -> Result<Option<Device>> {
        Ok(read(&self.inner).devices.rows.get(&id).cloned())
    }

    async fn update_device(&self, device: &Device) -> Result<Option<Device>> {
        Ok(write(&self.inner).devices.replace(device.id, device))
    }

    async fn list_devices(&self, site: Option<Id>, window: Window) -> Result<Page<Device>> {
        Ok(read(&self.inner)
            .devices
            .page(|d| site.map_or(true, |s| d.site_id == s), window))
    }

    async fn create_sensor(&self, sensor: NewSensor) -> Result<Sensor> {
        Ok(write(&self.inner).sensors.insert_with(|id| Sensor {
            id,
            device_id: sensor.device_id,
            sensor_type: sensor.sensor_type,
            metric: sensor.metric,
            unit: sensor.unit,
            active: sensor.active,
            value: None,
            updated: None,
        }))
    }

    async fn get_sensor(&self, id: Id) -> Result<Option<Sensor>> {
        Ok(read(&self.inner).sensors.rows.get(&id).cloned())
    }

    async fn update_sensor(&self, sensor: &Sensor) -> Result<Option<Sensor>> {
        Ok(write(&self.inner).sensors.replace(sensor.id, sensor))
    }

    async fn list_sensors(&self, device: Option<Id>, window: Window) -> Result<Page<Sensor>> {
        Ok(read(&self.inner)
            .sensors
            .page(|s| device.map_or(true, |d| s.device_id == d), window))
    }

    async fn record_reading(&self, sensor: Id, value: f64, at: DateTime<Utc>) -> Result<()> {
        let mut inner = write(&self.inner);
        if let Some(sensor) = inner.sensors.rows.get_mut(&sensor) {
            if sensor.updated.map_or(true, |updated| updated <= at) {
                sensor.value = Some(value);
                sensor.updated = Some(at);
            }
        }
        Ok(())
    }

    async fn create_metadata(&self, metadata: NewMetadata) -> Result<Metadata> {
        Ok(write(&self.inner).metadata.insert_with(|id| Metadata {
            id,
            owner: metadata.owner,
            key: metadata.key,
            value: metadata.value,
            timestamp: metadata.timestamp,
        }))
    }

    async fn get_metadata(&self, id: Id) -> Result<Option<Metadata>> {
        Ok(read(&self.inner).metadata.rows.get(&id).cloned())
    }

    async fn latest_metadata(&self, owner: OwnerRef) -> Result<Vec<Metadata>> {
        let inner = read(&self.inner);
        let mut latest: BTreeMap<&str, &Metadata> = BTreeMap::new();
        // Rows iterate in id order, so a later insert wins a timestamp tie.
        for record in inner.metadata.rows.values().filter(|m| m.owner == owner) {
            match latest.get(record.key.as_str()) {
                Some(current) if current.timestamp > record.timestamp => {}
                _ => {
                    latest.insert(record.key.as_str(), record);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTimeSeries {
    points: RwLock<BTreeMap<(Id, DateTime<Utc>), ScalarDataPoint>>,
    buckets: RwLock<BTreeMap<(AggWindow, Id, DateTime<Utc>), AggregateBucket>>,
}

impl MemoryTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeries {
    async fn post_data(&self, point: &ScalarDataPoint) -> Result<bool> {
        match write(&self.points).entry((point.sensor_id, point.timestamp)) {
            Entry::Vacant(slot) => {
                slot.insert(point.clone());
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    async fn get_sensor_data(&self, filter: &DataFilter) -> Result<Vec<ScalarDataPoint>> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        let (gte, lt) = filter.bounds();
        Ok(read(&self.points)
            .range((filter.sensor_id, gte)..(filter.sensor_id, lt))
            .map(|(_, point)| point.clone())
            .collect())
    }

    async fn get_aggregates(
        &self,
        window: AggWindow,
        filter: &DataFilter,
    ) -> Result<Vec<AggregateBucket>> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        let (gte, lt) = filter.bounds();
        Ok(read(&self.buckets)
            .range((window, filter.sensor_id, gte)..(window, filter.sensor_id, lt))
            .map(|(_, bucket)| bucket.clone())
            .collect())
    }

    async fn store_aggregates(
        &self,
        window: AggWindow,
        sensor_id: Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        buckets: &[AggregateBucket],
    ) -> Result<()> {
        let mut stored = write(&self.buckets);
        if from < to {
            let stale: Vec<_> = stored
                .range((window, sensor_id, from)..(window, sensor_id, to))
                .map(|(key, _)| *key)
                .collect();
            for key in stale {
                stored.remove(&key);
            }
        }
        for bucket in buckets {
            stored.insert((window, sensor_id, bucket.timestamp), bucket.clone());
        }
        Ok(())
    }
}
