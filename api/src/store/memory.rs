use super::{
    DeviceChange, DeviceStore, MEMBERSHIP_LIMIT, StatusWrite, StoreError, UserStore,
    VerificationWrite, change_channel,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use models::device::{DeviceFilter, DeviceRecord, DeviceStatus, NewDevice};
use models::user::{Role, UpdateProfile, User};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct VerificationLogEntry {
    pub device_id: i32,
    pub owner_id: i32,
    pub scanned_serial: String,
    pub expected_serial: String,
    pub is_match: bool,
    pub actor_id: i32,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    devices: Vec<DeviceRecord>,
    users: Vec<(String, User)>,
    verification_log: Vec<VerificationLogEntry>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Store-assigned timestamps never repeat, even on coarse clocks.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn device_mut(&mut self, id: i32) -> Result<&mut DeviceRecord, StoreError> {
        self.devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(StoreError::NotFound)
    }

    fn user_mut(&mut self, id: i32) -> Result<&mut User, StoreError> {
        self.users
            .iter_mut()
            .map(|(_, user)| user)
            .find(|u| u.id == id)
            .ok_or(StoreError::UserNotFound)
    }
}

/// In-process store. Also counts the queries issued against it so callers
/// can assert on access patterns.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<DeviceChange>,
    membership_queries: AtomicUsize,
    full_scans: AtomicUsize,
    registration_queries: AtomicUsize,
    status_writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            changes: change_channel(),
            membership_queries: AtomicUsize::new(0),
            full_scans: AtomicUsize::new(0),
            registration_queries: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a poisoned lock only means another test thread panicked mid-write
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, device_id: i32) {
        // no subscribers is fine
        _ = self.changes.send(DeviceChange { device_id });
    }

    pub fn membership_queries(&self) -> usize {
        self.membership_queries.load(Ordering::SeqCst)
    }

    pub fn full_scans(&self) -> usize {
        self.full_scans.load(Ordering::SeqCst)
    }

    pub fn registration_queries(&self) -> usize {
        self.registration_queries.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn verification_log(&self) -> Vec<VerificationLogEntry> {
        self.lock().verification_log.clone()
    }
}

fn newest_first(mut devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    devices.sort_by(|a, b| b.created_on.cmp(&a.created_on).then(b.id.cmp(&a.id)));
    devices
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn insert_device(
        &self,
        owner_id: i32,
        registration_number: &str,
        device: &NewDevice,
    ) -> Result<DeviceRecord, StoreError> {
        let record = {
            let mut inner = self.lock();
            let created_on = inner.stamp();
            let record = DeviceRecord {
                id: inner.devices.len() as i32 + 1,
                serial_number: device.serial_number.clone(),
                model: device.model.clone(),
                owner_id,
                registration_number: registration_number.to_owned(),
                status: DeviceStatus::OutSchool,
                last_verified_at: None,
                last_scanned_by: None,
                sn_mismatch: false,
                created_on,
                version: 0,
            };
            inner.devices.push(record.clone());
            record
        };
        self.notify(record.id);
        Ok(record)
    }

    async fn get_device(&self, id: i32) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(self.lock().devices.iter().find(|d| d.id == id).cloned())
    }

    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>, StoreError> {
        if *filter == DeviceFilter::default() {
            self.full_scans.fetch_add(1, Ordering::SeqCst);
        }
        let devices = self
            .lock()
            .devices
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        Ok(newest_first(devices))
    }

    async fn count_devices(&self, filter: &DeviceFilter) -> Result<u32, StoreError> {
        let count = self
            .lock()
            .devices
            .iter()
            .filter(|d| filter.matches(d))
            .count();
        Ok(count as u32)
    }

    async fn find_by_serial(&self, serial_number: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| d.serial_number == serial_number)
            .cloned()
            .collect())
    }

    async fn find_by_serials(
        &self,
        serial_numbers: &[String],
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        if serial_numbers.len() > MEMBERSHIP_LIMIT {
            return Err(StoreError::MembershipLimit(serial_numbers.len()));
        }
        self.membership_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| serial_numbers.contains(&d.serial_number))
            .cloned()
            .collect())
    }

    async fn find_by_registration(
        &self,
        registration_number: &str,
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        self.registration_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| d.registration_number == registration_number)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: i32, write: StatusWrite) -> Result<DeviceRecord, StoreError> {
        let record = {
            let mut inner = self.lock();
            let stamp = inner.stamp();
            let device = inner.device_mut(id)?;
            device.status = write.status;
            device.last_verified_at = Some(stamp);
            device.last_scanned_by = Some(write.actor_id);
            device.version += 1;
            device.clone()
        };
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.notify(id);
        Ok(record)
    }

    async fn set_status_if_version(
        &self,
        id: i32,
        write: StatusWrite,
        expected_version: i32,
    ) -> Result<DeviceRecord, StoreError> {
        let record = {
            let mut inner = self.lock();
            let stamp = inner.stamp();
            let device = inner.device_mut(id)?;
            if device.version != expected_version {
                return Err(StoreError::Conflict);
            }
            device.status = write.status;
            device.last_verified_at = Some(stamp);
            device.last_scanned_by = Some(write.actor_id);
            device.version += 1;
            device.clone()
        };
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.notify(id);
        Ok(record)
    }

    async fn apply_verification(
        &self,
        id: i32,
        write: VerificationWrite,
    ) -> Result<DeviceRecord, StoreError> {
        let record = {
            let mut inner = self.lock();
            let stamp = inner.stamp();
            let device = inner.device_mut(id)?;
            if let Some(status) = write.status {
                device.status = status;
            }
            device.sn_mismatch = !write.is_match;
            device.last_verified_at = Some(stamp);
            device.last_scanned_by = Some(write.actor_id);
            device.version += 1;
            let record = device.clone();

            inner.verification_log.push(VerificationLogEntry {
                device_id: id,
                owner_id: record.owner_id,
                scanned_serial: write.observed_serial,
                expected_serial: write.expected_serial,
                is_match: write.is_match,
                actor_id: write.actor_id,
                created_on: stamp,
            });
            record
        };
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.notify(id);
        Ok(record)
    }

    fn changes(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, user)| user.clone()))
    }

    async fn create_user(&self, subject: &str, email: Option<&str>) -> Result<User, StoreError> {
        let mut inner = self.lock();
        if let Some((_, user)) = inner.users.iter_mut().find(|(s, _)| s == subject) {
            if user.email.is_none() {
                user.email = email.map(str::to_owned);
            }
            return Ok(user.clone());
        }

        let created_on = inner.stamp();
        let user = User {
            id: inner.users.len() as i32 + 1,
            email: email.map(str::to_owned),
            role: None,
            registration_number: None,
            location_id: None,
            last_active: None,
            created_on,
        };
        inner.users.push((subject.to_owned(), user.clone()));
        Ok(user)
    }

    async fn get_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .map(|(_, user)| user)
            .find(|u| u.id == id)
            .cloned())
    }

    async fn touch(&self, id: i32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let stamp = inner.stamp();
        inner.user_mut(id)?.last_active = Some(stamp);
        Ok(())
    }

    async fn update_profile(&self, id: i32, profile: &UpdateProfile) -> Result<User, StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        if let Some(registration_number) = &profile.registration_number {
            user.registration_number = Some(registration_number.clone());
        }
        if let Some(location_id) = &profile.location_id {
            user.location_id = Some(location_id.clone());
        }
        Ok(user.clone())
    }

    async fn set_role(&self, id: i32, role: Role) -> Result<User, StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        user.role = Some(role);
        Ok(user.clone())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .map(|(_, user)| user)
            .filter(|u| u.role == Some(role))
            .cloned()
            .collect())
    }
}
