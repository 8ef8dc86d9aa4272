//! Postgres implementation of [`DeviceRepository`].

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use ulid::Ulid;

use sigil_core::repository::DeviceRepository;
use sigil_core::{Device, Result};

use crate::error::DbError;
use crate::repository::{SharedTx, execute, fetch_all, fetch_optional, map_unique};

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    id: String,
    user_id: String,
    client_id: Vec<u8>,
    public_key: Vec<u8>,
    aaguid: Vec<u8>,
    name: String,
    sign_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeviceRow {
    fn try_into_device(self) -> Result<Device> {
        let sign_count = u32::try_from(self.sign_count)
            .map_err(|_| DbError::Decode(format!("sign_count out of range: {}", self.sign_count)))?;
        Ok(Device {
            id: self.id,
            user_id: self.user_id,
            client_id: self.client_id,
            public_key: self.public_key,
            aaguid: self.aaguid,
            name: self.name,
            sign_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgDeviceRepository {
    pub(crate) pool: PgPool,
    pub(crate) tx: Option<SharedTx>,
}

impl PgDeviceRepository {
    pub(crate) fn new(pool: PgPool, tx: Option<SharedTx>) -> Self {
        Self { pool, tx }
    }
}

impl DeviceRepository for PgDeviceRepository {
    async fn by_id(&self, device_id: &str) -> Result<Device> {
        let query =
            sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE id = $1").bind(device_id);

        fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("device", device_id))?
            .try_into_device()
    }

    async fn by_client_id(&self, user_id: &str, client_id: &[u8]) -> Result<Device> {
        let query = sqlx::query_as::<_, DeviceRow>(
            "SELECT * FROM devices WHERE user_id = $1 AND client_id = $2",
        )
        .bind(user_id)
        .bind(client_id);

        fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("device", user_id))?
            .try_into_device()
    }

    async fn by_user_id(&self, user_id: &str) -> Result<Vec<Device>> {
        let query = sqlx::query_as::<_, DeviceRow>(
            "SELECT * FROM devices WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id);

        fetch_all!(self, query)
            .map_err(DbError::from)?
            .into_iter()
            .map(DeviceRow::try_into_device)
            .collect()
    }

    async fn create(&self, device: Device) -> Result<Device> {
        let id = Ulid::new().to_string();
        let query = sqlx::query_as::<_, DeviceRow>(
            "INSERT INTO devices (
                id, user_id, client_id, public_key, aaguid, name, sign_count
             ) VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(&id)
        .bind(&device.user_id)
        .bind(&device.client_id)
        .bind(&device.public_key)
        .bind(&device.aaguid)
        .bind(&device.name)
        .bind(i64::from(device.sign_count));

        fetch_optional!(self, query)
            .map_err(map_unique("device"))?
            .ok_or_else(|| DbError::not_found("device", id))?
            .try_into_device()
    }

    async fn get_for_update(&self, device_id: &str) -> Result<Device> {
        if self.tx.is_none() {
            return Err(DbError::NoTransaction.into());
        }

        let query =
            sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE id = $1 FOR UPDATE")
                .bind(device_id);

        fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("device", device_id))?
            .try_into_device()
    }

    async fn update(&self, device: &Device) -> Result<Device> {
        let query = sqlx::query_as::<_, DeviceRow>(
            "UPDATE devices SET
                name = $2, sign_count = $3, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(i64::from(device.sign_count));

        fetch_optional!(self, query)
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::not_found("device", &device.id))?
            .try_into_device()
    }

    async fn remove(&self, device_id: &str, user_id: &str) -> Result<()> {
        let query = sqlx::query("DELETE FROM devices WHERE id = $1 AND user_id = $2")
            .bind(device_id)
            .bind(user_id);

        let result = execute!(self, query).map_err(DbError::from)?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("device", device_id).into());
        }
        Ok(())
    }
}
