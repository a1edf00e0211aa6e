//! Persistence port for devices and users.
//!
//! Handlers and the scan workflow only talk to [`DeviceStore`] and
//! [`UserStore`]; `PgStore` backs them with PostgreSQL and `MemoryStore`
//! keeps everything in process.

use async_trait::async_trait;
use futures::Stream;
use models::device::{DeviceFilter, DeviceRecord, DeviceStatus, NewDevice};
use models::user::{Role, UpdateProfile, User};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Most values a single serial-number membership query accepts.
pub const MEMBERSHIP_LIMIT: usize = 10;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("membership query accepts at most {MEMBERSHIP_LIMIT} values, got {0}")]
    MembershipLimit(usize),
    #[error("device not found")]
    NotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("record was modified by another writer")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A status write always carries its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWrite {
    pub status: DeviceStatus,
    pub actor_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationWrite {
    /// `None` leaves the current status untouched.
    pub status: Option<DeviceStatus>,
    pub is_match: bool,
    pub observed_serial: String,
    pub expected_serial: String,
    pub actor_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceChange {
    pub device_id: i32,
}

#[async_trait]
pub trait DeviceStore: Send + Sync + Debug {
    async fn insert_device(
        &self,
        owner_id: i32,
        registration_number: &str,
        device: &NewDevice,
    ) -> Result<DeviceRecord, StoreError>;

    async fn get_device(&self, id: i32) -> Result<Option<DeviceRecord>, StoreError>;

    /// Newest first.
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>, StoreError>;

    async fn count_devices(&self, filter: &DeviceFilter) -> Result<u32, StoreError>;

    /// Exact match on serial number, oldest first.
    async fn find_by_serial(&self, serial_number: &str) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Membership query, rejects more than [`MEMBERSHIP_LIMIT`] values.
    async fn find_by_serials(&self, serial_numbers: &[String])
    -> Result<Vec<DeviceRecord>, StoreError>;

    async fn find_by_registration(
        &self,
        registration_number: &str,
    ) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Unconditional write, the last writer wins. The timestamp is assigned
    /// by the store.
    async fn set_status(&self, id: i32, write: StatusWrite) -> Result<DeviceRecord, StoreError>;

    /// Same as [`DeviceStore::set_status`] but only applies while the record
    /// is still at `expected_version`, otherwise [`StoreError::Conflict`].
    async fn set_status_if_version(
        &self,
        id: i32,
        write: StatusWrite,
        expected_version: i32,
    ) -> Result<DeviceRecord, StoreError>;

    /// Stamps the verification onto the record and appends it to the
    /// verification log in one transaction.
    async fn apply_verification(
        &self,
        id: i32,
        write: VerificationWrite,
    ) -> Result<DeviceRecord, StoreError>;

    fn changes(&self) -> broadcast::Receiver<DeviceChange>;
}

#[async_trait]
pub trait UserStore: Send + Sync + Debug {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, StoreError>;

    /// Creates the user on first sight, returns the existing one otherwise.
    async fn create_user(&self, subject: &str, email: Option<&str>) -> Result<User, StoreError>;

    async fn get_user(&self, id: i32) -> Result<Option<User>, StoreError>;

    async fn touch(&self, id: i32) -> Result<(), StoreError>;

    async fn update_profile(&self, id: i32, profile: &UpdateProfile) -> Result<User, StoreError>;

    async fn set_role(&self, id: i32, role: Role) -> Result<User, StoreError>;

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, StoreError>;
}

/// Full snapshots of the devices matching `filter`: one immediately, then a
/// fresh one after every change. Changes that pile up while a snapshot is
/// being read are folded into the next one.
pub fn subscribe(
    store: Arc<dyn DeviceStore>,
    filter: DeviceFilter,
) -> impl Stream<Item = Result<Vec<DeviceRecord>, StoreError>> + Send {
    let receiver = store.changes();

    futures::stream::unfold(
        (store, filter, receiver, true),
        |(store, filter, mut receiver, first)| async move {
            if !first {
                match receiver.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
                loop {
                    match receiver.try_recv() {
                        Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Closed) => return None,
                    }
                }
            }

            let snapshot = store.list_devices(&filter).await;
            Some((snapshot, (store, filter, receiver, false)))
        },
    )
}

fn change_channel() -> broadcast::Sender<DeviceChange> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}
