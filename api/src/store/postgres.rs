use super::{
    DeviceChange, DeviceStore, MEMBERSHIP_LIMIT, StatusWrite, StoreError, UserStore,
    VerificationWrite, change_channel,
};
use async_trait::async_trait;
use models::device::{DeviceFilter, DeviceRecord, NewDevice};
use models::user::{Role, UpdateProfile, User};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const DEVICE_CHANGES_CHANNEL: &str = "device_changes";

const DEVICE_COLUMNS: &str = "id, serial_number, model, owner_id, registration_number, status, \
     last_verified_at, last_scanned_by, sn_mismatch, created_on, version";

const USER_COLUMNS: &str =
    "id, email, role, registration_number, location_id, last_active, created_on";

const FILTER_CLAUSE: &str = r#"
    ($1::device_status IS NULL OR status = $1)
    AND ($2::boolean IS NULL OR sn_mismatch = $2)
    AND ($3::text IS NULL OR registration_number ILIKE '%' || $3 || '%' ESCAPE '\')
    AND ($4::integer IS NULL OR owner_id = $4)
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<DeviceChange>,
}

impl PgStore {
    /// Wraps the pool and starts forwarding `device_changes` notifications
    /// to subscribers.
    pub async fn new(pool: PgPool) -> Result<Self, StoreError> {
        let changes = change_channel();

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(DEVICE_CHANGES_CHANNEL).await?;

        let sender = changes.clone();
        tokio::spawn(async move {
            info!("Listening for device changes");
            loop {
                match listener.recv().await {
                    Ok(notification) => match notification.payload().parse::<i32>() {
                        Ok(device_id) => {
                            _ = sender.send(DeviceChange { device_id });
                        }
                        Err(err) => {
                            warn!("Ignoring malformed device change {:?}: {err}", notification.payload());
                        }
                    },
                    Err(err) => {
                        error!("Device change listener failed: {err}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { pool, changes })
    }
}

fn like_escape(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn registration_search(filter: &DeviceFilter) -> Option<String> {
    filter
        .registration_number
        .as_deref()
        .map(str::trim)
        .filter(|needle| !needle.is_empty())
        .map(like_escape)
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn insert_device(
        &self,
        owner_id: i32,
        registration_number: &str,
        device: &NewDevice,
    ) -> Result<DeviceRecord, StoreError> {
        let query = format!(
            "INSERT INTO device (serial_number, model, owner_id, registration_number) \
             VALUES ($1, $2, $3, $4) RETURNING {DEVICE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(&device.serial_number)
            .bind(&device.model)
            .bind(owner_id)
            .bind(registration_number)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_device(&self, id: i32) -> Result<Option<DeviceRecord>, StoreError> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM device WHERE id = $1");
        let record = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>, StoreError> {
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM device WHERE {FILTER_CLAUSE} ORDER BY created_on DESC, id DESC"
        );
        let devices = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(filter.status)
            .bind(filter.mismatch)
            .bind(registration_search(filter))
            .bind(filter.owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn count_devices(&self, filter: &DeviceFilter) -> Result<u32, StoreError> {
        let query = format!("SELECT COUNT(*) FROM device WHERE {FILTER_CLAUSE}");
        let count: i64 = sqlx::query_scalar(&query)
            .bind(filter.status)
            .bind(filter.mismatch)
            .bind(registration_search(filter))
            .bind(filter.owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    async fn find_by_serial(&self, serial_number: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        let query =
            format!("SELECT {DEVICE_COLUMNS} FROM device WHERE serial_number = $1 ORDER BY id");
        let devices = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(serial_number)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn find_by_serials(
        &self,
        serial_numbers: &[String],
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        if serial_numbers.len() > MEMBERSHIP_LIMIT {
            return Err(StoreError::MembershipLimit(serial_numbers.len()));
        }
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM device WHERE serial_number = ANY($1) ORDER BY id"
        );
        let devices = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(serial_numbers)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn find_by_registration(
        &self,
        registration_number: &str,
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM device WHERE registration_number = $1 ORDER BY id"
        );
        let devices = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(registration_number)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    async fn set_status(&self, id: i32, write: StatusWrite) -> Result<DeviceRecord, StoreError> {
        let query = format!(
            r#"
            UPDATE device
            SET status = $2, last_verified_at = now(), last_scanned_by = $3, version = version + 1
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(id)
            .bind(write.status)
            .bind(write.actor_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn set_status_if_version(
        &self,
        id: i32,
        write: StatusWrite,
        expected_version: i32,
    ) -> Result<DeviceRecord, StoreError> {
        let query = format!(
            r#"
            UPDATE device
            SET status = $2, last_verified_at = now(), last_scanned_by = $3, version = version + 1
            WHERE id = $1 AND version = $4
            RETURNING {DEVICE_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(id)
            .bind(write.status)
            .bind(write.actor_id)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM device WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&self.pool)
                        .await?;
                debug!("Conditional status write on device {id} missed (exists: {exists})");
                Err(if exists {
                    StoreError::Conflict
                } else {
                    StoreError::NotFound
                })
            }
        }
    }

    async fn apply_verification(
        &self,
        id: i32,
        write: VerificationWrite,
    ) -> Result<DeviceRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"
            UPDATE device
            SET status = COALESCE($2, status),
                sn_mismatch = NOT $3,
                last_verified_at = now(),
                last_scanned_by = $4,
                version = version + 1
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, DeviceRecord>(&query)
            .bind(id)
            .bind(write.status)
            .bind(write.is_match)
            .bind(write.actor_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        sqlx::query(
            r#"
            INSERT INTO verification_log
                (device_id, owner_id, scanned_serial, expected_serial, is_match, actor_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(record.owner_id)
        .bind(&write.observed_serial)
        .bind(&write.expected_serial)
        .bind(write.is_match)
        .bind(write.actor_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    fn changes(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE subject = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_user(&self, subject: &str, email: Option<&str>) -> Result<User, StoreError> {
        let query = format!(
            r#"
            INSERT INTO users (subject, email)
            VALUES ($1, $2)
            ON CONFLICT (subject) DO UPDATE SET email = COALESCE(users.email, EXCLUDED.email)
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(subject)
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn touch(&self, id: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_active = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_profile(&self, id: i32, profile: &UpdateProfile) -> Result<User, StoreError> {
        let query = format!(
            r#"
            UPDATE users
            SET registration_number = COALESCE($2, registration_number),
                location_id = COALESCE($3, location_id)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(&profile.registration_number)
            .bind(&profile.location_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UserNotFound)
    }

    async fn set_role(&self, id: i32, role: Role) -> Result<User, StoreError> {
        let query = format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(role)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UserNotFound)
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE role = $1 ORDER BY id");
        let users = sqlx::query_as::<_, User>(&query)
            .bind(role)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("CS_01%"), "CS\\_01\\%");
        assert_eq!(like_escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_blank_registration_search_is_ignored() {
        let filter = DeviceFilter {
            registration_number: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(registration_search(&filter), None);
    }
}
