//! Postgres-backed entity and time-series stores.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{error, info, warn};

use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{
    AggWindow, AggregateBucket, Device, GeoLocation, Id, Metadata, NewDevice, NewMetadata,
    NewSensor, NewSite, OwnerRef, ScalarDataPoint, Sensor, SensorType, Site,
};
use crate::pagination::{Page, Window};
use crate::store::{DataFilter, EntityStore, TimeSeriesStore};

const MAX_ATTEMPTS: u32 = 5;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Retries `op` with exponential backoff while it fails with a transient error.
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts < MAX_ATTEMPTS && is_transient_error(&e) => {
                let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    what, attempts, MAX_ATTEMPTS, wait_ms, e
                );
                DB_FAILURES_TOTAL.inc();
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            Err(e) => {
                error!("{} failed permanently after {} attempts: {}", what, attempts, e);
                return Err(Error::Database(e));
            }
        }
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code == "08000" || // connection_exception
            code == "08003" || // connection_does_not_exist
            code == "08006" || // connection_failure
            code == "57P03" || // cannot_connect_now
            code == "53300" || // too_many_connections
            code == "40001" // serialization_failure
        }),
        _ => false,
    }
}

fn geo(latitude: Option<f64>, longitude: Option<f64>, elevation: Option<f64>) -> Option<GeoLocation> {
    Some(GeoLocation {
        latitude: latitude?,
        longitude: longitude?,
        elevation,
    })
}

fn geo_columns(geo: &Option<GeoLocation>) -> (Option<f64>, Option<f64>, Option<f64>) {
    match geo {
        Some(g) => (Some(g.latitude), Some(g.longitude), g.elevation),
        None => (None, None, None),
    }
}

fn limit(window: Window) -> (i64, i64) {
    (
        i64::try_from(window.size).unwrap_or(i64::MAX),
        i64::try_from(window.offset).unwrap_or(i64::MAX),
    )
}

#[derive(Debug, FromRow)]
struct SiteRow {
    id: i64,
    name: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    raw_zmq_stream: Option<String>,
}

impl From<SiteRow> for Site {
    fn from(row: SiteRow) -> Self {
        Site {
            id: row.id,
            name: row.name,
            geo_location: geo(row.latitude, row.longitude, row.elevation),
            raw_zmq_stream: row.raw_zmq_stream,
        }
    }
}

#[derive(Debug, FromRow)]
struct DeviceRow {
    id: i64,
    site_id: i64,
    name: String,
    active: bool,
    description: Option<String>,
    building: Option<String>,
    floor: Option<String>,
    room: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.id,
            site_id: row.site_id,
            name: row.name,
            active: row.active,
            description: row.description,
            building: row.building,
            floor: row.floor,
            room: row.room,
            geo_location: geo(row.latitude, row.longitude, row.elevation),
        }
    }
}

#[derive(Debug, FromRow)]
struct SensorRow {
    id: i64,
    device_id: i64,
    sensor_type: String,
    metric: String,
    unit: String,
    active: bool,
    value: Option<f64>,
    updated: Option<DateTime<Utc>>,
}

impl TryFrom<SensorRow> for Sensor {
    type Error = Error;

    fn try_from(row: SensorRow) -> Result<Self> {
        let sensor_type: SensorType = row.sensor_type.parse().map_err(|e: String| {
            Error::Database(sqlx::Error::Decode(e.into()))
        })?;
        Ok(Sensor {
            id: row.id,
            device_id: row.device_id,
            sensor_type,
            metric: row.metric,
            unit: row.unit,
            active: row.active,
            value: row.value,
            updated: row.updated,
        })
    }
}

#[derive(Debug, FromRow)]
struct MetadataRow {
    id: i64,
    owner_kind: String,
    owner_id: i64,
    key: String,
    value: String,
    ts: DateTime<Utc>,
}

impl TryFrom<MetadataRow> for Metadata {
    type Error = Error;

    fn try_from(row: MetadataRow) -> Result<Self> {
        let owner = OwnerRef::from_parts(&row.owner_kind, row.owner_id).ok_or_else(|| {
            Error::Database(sqlx::Error::Decode(
                format!("unknown metadata owner kind '{}'", row.owner_kind).into(),
            ))
        })?;
        Ok(Metadata {
            id: row.id,
            owner,
            key: row.key,
            value: row.value,
            timestamp: row.ts,
        })
    }
}

#[derive(Debug, FromRow)]
struct DataRow {
    site_id: i64,
    device_id: i64,
    sensor_id: i64,
    ts: DateTime<Utc>,
    value: f64,
}

#[derive(Debug, FromRow)]
struct BucketRow {
    sensor_id: i64,
    ts: DateTime<Utc>,
    min: f64,
    max: f64,
    mean: f64,
    count: i64,
    sum: f64,
}

const SITE_COLUMNS: &str = "id, name, latitude, longitude, elevation, raw_zmq_stream";
const DEVICE_COLUMNS: &str =
    "id, site_id, name, active, description, building, floor, room, latitude, longitude, elevation";
const SENSOR_COLUMNS: &str = "id, device_id, sensor_type, metric, unit, active, value, updated";
const METADATA_COLUMNS: &str = "id, owner_kind, owner_id, key, value, ts";

/// One pool serving both store traits.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Size of a collection filtered by an optional parent id bound to `$1`.
    async fn count(&self, sql: &str, filter: Option<Id>) -> Result<usize> {
        let total: i64 = sqlx::query_scalar(sql)
            .bind(filter)
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(total).unwrap_or_default())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn create_site(&self, site: NewSite) -> Result<Site> {
        let (lat, lon, elev) = geo_columns(&site.geo_location);
        let sql = format!(
            "INSERT INTO sites (name, latitude, longitude, elevation, raw_zmq_stream) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SITE_COLUMNS
        );
        let row: SiteRow = sqlx::query_as(&sql)
            .bind(&site.name)
            .bind(lat)
            .bind(lon)
            .bind(elev)
            .bind(&site.raw_zmq_stream)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn get_site(&self, id: Id) -> Result<Option<Site>> {
        let sql = format!("SELECT {} FROM sites WHERE id = $1", SITE_COLUMNS);
        let row: Option<SiteRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Site::from))
    }

    async fn update_site(&self, site: &Site) -> Result<Option<Site>> {
        let (lat, lon, elev) = geo_columns(&site.geo_location);
        let sql = format!(
            "UPDATE sites SET name = $2, latitude = $3, longitude = $4, elevation = $5, \
             raw_zmq_stream = $6 WHERE id = $1 RETURNING {}",
            SITE_COLUMNS
        );
        let row: Option<SiteRow> = sqlx::query_as(&sql)
            .bind(site.id)
            .bind(&site.name)
            .bind(lat)
            .bind(lon)
            .bind(elev)
            .bind(&site.raw_zmq_stream)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Site::from))
    }

    async fn list_sites(&self, window: Window) -> Result<Page<Site>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites")
            .fetch_one(&self.pool)
            .await?;
        let total = usize::try_from(total).unwrap_or_default();
        let (size, offset) = limit(window);
        let sql = format!(
            "SELECT {} FROM sites ORDER BY id LIMIT $1 OFFSET $2",
            SITE_COLUMNS
        );
        let rows: Vec<SiteRow> = sqlx::query_as(&sql)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(Page {
            items: rows.into_iter().map(Site::from).collect(),
            total,
        })
    }

    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        let (lat, lon, elev) = geo_columns(&device.geo_location);
        let sql = format!(
            "INSERT INTO devices (site_id, name, active, description, building, floor, room, \
             latitude, longitude, elevation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            DEVICE_COLUMNS
        );
        let row: DeviceRow = sqlx::query_as(&sql)
            .bind(device.site_id)
            .bind(&device.name)
            .bind(device.active)
            .bind(&device.description)
            .bind(&device.building)
            .bind(&device.floor)
            .bind(&device.room)
            .bind(lat)
            .bind(lon)
            .bind(elev)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn get_device(&self, id: Id) -> Result<Option<Device>> {
        let sql = format!("SELECT {} FROM devices WHERE id = $1", DEVICE_COLUMNS);
        let row: Option<DeviceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Device::from))
    }

    async fn update_device(&self, device: &Device) -> Result<Option<Device>> {
        let (lat, lon, elev) = geo_columns(&device.geo_location);
        let sql = format!(
            "UPDATE devices SET name = $2, active = $3, description = $4, building = $5, \
             floor = $6, room = $7, latitude = $8, longitude = $9, elevation = $10 \
             WHERE id = $1 RETURNING {}",
            DEVICE_COLUMNS
        );
        let row: Option<DeviceRow> = sqlx::query_as(&sql)
            .bind(device.id)
            .bind(&device.name)
            .bind(device.active)
            .bind(&device.description)
            .bind(&device.building)
            .bind(&device.floor)
            .bind(&device.room)
            .bind(lat)
            .bind(lon)
            .bind(elev)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Device::from))
    }

    async fn list_devices(&self, site: Option<Id>, window: Window) -> Result<Page<Device>> {
        let total = self
            .count(
                "SELECT COUNT(*) FROM devices WHERE $1::bigint IS NULL OR site_id = $1",
                site,
            )
            .await?;
        let (size, offset) = limit(window);
        let sql = format!(
            "SELECT {} FROM devices WHERE $1::bigint IS NULL OR site_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3",
            DEVICE_COLUMNS
        );
        let rows: Vec<DeviceRow> = sqlx::query_as(&sql)
            .bind(site)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(Page {
            items: rows.into_iter().map(Device::from).collect(),
            total,
        })
    }

    async fn create_sensor(&self, sensor: NewSensor) -> Result<Sensor> {
        let sql = format!(
            "INSERT INTO sensors (device_id, sensor_type, metric, unit, active) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SENSOR_COLUMNS
        );
        let row: SensorRow = sqlx::query_as(&sql)
            .bind(sensor.device_id)
            .bind(sensor.sensor_type.as_str())
            .bind(&sensor.metric)
            .bind(&sensor.unit)
            .bind(sensor.active)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_sensor(&self, id: Id) -> Result<Option<Sensor>> {
        let sql = format!("SELECT {} FROM sensors WHERE id = $1", SENSOR_COLUMNS);
        let row: Option<SensorRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Sensor::try_from).transpose()
    }

    async fn update_sensor(&self, sensor: &Sensor) -> Result<Option<Sensor>> {
        let sql = format!(
            "UPDATE sensors SET metric = $2, unit = $3, active = $4 WHERE id = $1 RETURNING {}",
            SENSOR_COLUMNS
        );
        let row: Option<SensorRow> = sqlx::query_as(&sql)
            .bind(sensor.id)
            .bind(&sensor.metric)
            .bind(&sensor.unit)
            .bind(sensor.active)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Sensor::try_from).transpose()
    }

    async fn list_sensors(&self, device: Option<Id>, window: Window) -> Result<Page<Sensor>> {
        let total = self
            .count(
                "SELECT COUNT(*) FROM sensors WHERE $1::bigint IS NULL OR device_id = $1",
                device,
            )
            .await?;
        let (size, offset) = limit(window);
        let sql = format!(
            "SELECT {} FROM sensors WHERE $1::bigint IS NULL OR device_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3",
            SENSOR_COLUMNS
        );
        let rows: Vec<SensorRow> = sqlx::query_as(&sql)
            .bind(device)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(Sensor::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    async fn record_reading(&self, sensor: Id, value: f64, at: DateTime<Utc>) -> Result<()> {
        let pool = &self.pool;
        with_retry("Sensor reading update", move || {
            sqlx::query(
                "UPDATE sensors SET value = $2, updated = $3 \
                 WHERE id = $1 AND (updated IS NULL OR updated <= $3)",
            )
            .bind(sensor)
            .bind(value)
            .bind(at)
            .execute(pool)
        })
        .await?;
        Ok(())
    }

    async fn create_metadata(&self, metadata: NewMetadata) -> Result<Metadata> {
        let sql = format!(
            "INSERT INTO metadata (owner_kind, owner_id, key, value, ts) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            METADATA_COLUMNS
        );
        let row: MetadataRow = sqlx::query_as(&sql)
            .bind(metadata.owner.kind())
            .bind(metadata.owner.id())
            .bind(&metadata.key)
            .bind(&metadata.value)
            .bind(metadata.timestamp)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get_metadata(&self, id: Id) -> Result<Option<Metadata>> {
        let sql = format!("SELECT {} FROM metadata WHERE id = $1", METADATA_COLUMNS);
        let row: Option<MetadataRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Metadata::try_from).transpose()
    }

    async fn latest_metadata(&self, owner: OwnerRef) -> Result<Vec<Metadata>> {
        let sql = format!(
            "SELECT DISTINCT ON (key) {} FROM metadata \
             WHERE owner_kind = $1 AND owner_id = $2 \
             ORDER BY key, ts DESC, id DESC",
            METADATA_COLUMNS
        );
        let rows: Vec<MetadataRow> = sqlx::query_as(&sql)
            .bind(owner.kind())
            .bind(owner.id())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Metadata::try_from).collect()
    }
}

#[async_trait]
impl TimeSeriesStore for PgStore {
    async fn post_data(&self, point: &ScalarDataPoint) -> Result<bool> {
        let pool = &self.pool;
        let result = with_retry("Data insert", move || {
            sqlx::query(
                "INSERT INTO scalar_data (sensor_id, ts, site_id, device_id, value) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (sensor_id, ts) DO NOTHING",
            )
            .bind(point.sensor_id)
            .bind(point.timestamp)
            .bind(point.site_id)
            .bind(point.device_id)
            .bind(point.value)
            .execute(pool)
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_sensor_data(&self, filter: &DataFilter) -> Result<Vec<ScalarDataPoint>> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<DataRow> = sqlx::query_as(
            "SELECT site_id, device_id, sensor_id, ts, value FROM scalar_data \
             WHERE sensor_id = $1 \
             AND ($2::timestamptz IS NULL OR ts >= $2) \
             AND ($3::timestamptz IS NULL OR ts < $3) \
             ORDER BY ts",
        )
        .bind(filter.sensor_id)
        .bind(filter.gte)
        .bind(filter.lt)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ScalarDataPoint {
                site_id: row.site_id,
                device_id: row.device_id,
                sensor_id: row.sensor_id,
                timestamp: row.ts,
                value: row.value,
            })
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
        let rows: Vec<BucketRow> = sqlx::query_as(
            "SELECT sensor_id, ts, min, max, mean, count, sum FROM aggregates \
             WHERE agg = $1 AND sensor_id = $2 \
             AND ($3::timestamptz IS NULL OR ts >= $3) \
             AND ($4::timestamptz IS NULL OR ts < $4) \
             ORDER BY ts",
        )
        .bind(window.token())
        .bind(filter.sensor_id)
        .bind(filter.gte)
        .bind(filter.lt)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| AggregateBucket {
                sensor_id: row.sensor_id,
                window,
                timestamp: row.ts,
                min: row.min,
                max: row.max,
                mean: row.mean,
                count: u64::try_from(row.count).unwrap_or_default(),
                sum: row.sum,
            })
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
        let pool = &self.pool;
        with_retry("Aggregate refresh", move || {
            replace_buckets(pool, window, sensor_id, from, to, buckets)
        })
        .await
    }
}

async fn replace_buckets(
    pool: &PgPool,
    window: AggWindow,
    sensor_id: Id,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    buckets: &[AggregateBucket],
) -> std::result::Result<(), sqlx::Error> {
    let timestamps: Vec<DateTime<Utc>> = buckets.iter().map(|b| b.timestamp).collect();
    let mins: Vec<f64> = buckets.iter().map(|b| b.min).collect();
    let maxes: Vec<f64> = buckets.iter().map(|b| b.max).collect();
    let means: Vec<f64> = buckets.iter().map(|b| b.mean).collect();
    let counts: Vec<i64> = buckets
        .iter()
        .map(|b| i64::try_from(b.count).unwrap_or(i64::MAX))
        .collect();
    let sums: Vec<f64> = buckets.iter().map(|b| b.sum).collect();

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM aggregates WHERE agg = $1 AND sensor_id = $2 AND ts >= $3 AND ts < $4")
        .bind(window.token())
        .bind(sensor_id)
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?;

    if !buckets.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO aggregates (agg, sensor_id, ts, min, max, mean, count, sum)
            SELECT $1, $2, * FROM UNNEST($3::timestamptz[], $4::float8[], $5::float8[], $6::float8[], $7::int8[], $8::float8[])
            ON CONFLICT (agg, sensor_id, ts) DO UPDATE
            SET min = EXCLUDED.min, max = EXCLUDED.max, mean = EXCLUDED.mean,
                count = EXCLUDED.count, sum = EXCLUDED.sum
            "#,
        )
        .bind(window.token())
        .bind(sensor_id)
        .bind(&timestamps)
        .bind(&mins)
        .bind(&maxes)
        .bind(&means)
        .bind(&counts)
        .bind(&sums)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}
