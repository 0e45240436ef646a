//! Device configuration ownership, patching and persistence.
//!
//! The configuration is persisted as a single fixed-layout record. String fields
//! occupy zero-padded buffers one byte larger than their capacity so the stored
//! value is always NUL terminated, and an MD5 digest over the record body lets
//! [`ConfigStore::load`] reject torn or corrupted writes.

use crate::error::{Result, TrackerError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, error, info, warn};

/// Capacity of `wifi_ssid` in bytes
pub const WIFI_SSID_CAPACITY: usize = 31;
/// Capacity of `wifi_password` in bytes
pub const WIFI_PASSWORD_CAPACITY: usize = 31;
/// Capacity of `device_id` in bytes
pub const DEVICE_ID_CAPACITY: usize = 36;
/// Capacity of `api_endpoint` in bytes
pub const API_ENDPOINT_CAPACITY: usize = 99;
/// Capacity of `api_key` in bytes
pub const API_KEY_CAPACITY: usize = 99;

/// Default report interval in seconds
pub const DEFAULT_TRANSMIT_INTERVAL: u32 = 60;
/// Default motion threshold in g
pub const DEFAULT_MOTION_THRESHOLD: f32 = 0.5;

/// Magic prefix of a persisted record
pub const RECORD_MAGIC: [u8; 4] = *b"TRK1";

const DIGEST_SIZE: usize = 16;
const RECORD_BODY_SIZE: usize = RECORD_MAGIC.len()
    + (WIFI_SSID_CAPACITY + 1)
    + (WIFI_PASSWORD_CAPACITY + 1)
    + (DEVICE_ID_CAPACITY + 1)
    + (API_ENDPOINT_CAPACITY + 1)
    + (API_KEY_CAPACITY + 1)
    + 1
    + 4
    + 4;

/// Total size of a persisted record in bytes
pub const RECORD_SIZE: usize = RECORD_BODY_SIZE + DIGEST_SIZE;

/// Persisted device configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Network SSID
    pub wifi_ssid: String,
    /// Network passphrase
    pub wifi_password: String,
    /// Device identifier, UUID shaped but not validated
    pub device_id: String,
    /// Backend endpoint
    pub api_endpoint: String,
    /// Backend key; never echoed over the status or config channels
    pub api_key: String,
    /// Set once any network identity has been written
    pub paired: bool,
    /// Report interval in seconds, always positive
    pub transmit_interval: u32,
    /// Motion threshold in g, never negative
    pub motion_threshold: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            device_id: String::new(),
            api_endpoint: String::new(),
            api_key: String::new(),
            paired: false,
            transmit_interval: DEFAULT_TRANSMIT_INTERVAL,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
        }
    }
}

/// Partial configuration update; absent fields are left untouched
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialConfigUpdate {
    /// New SSID
    pub wifi_ssid: Option<String>,
    /// New passphrase
    pub wifi_password: Option<String>,
    /// New device identifier
    pub device_id: Option<String>,
    /// New backend endpoint
    pub api_endpoint: Option<String>,
    /// New backend key
    pub api_key: Option<String>,
    /// New report interval in seconds
    pub transmit_interval: Option<u32>,
    /// New motion threshold in g
    pub motion_threshold: Option<f32>,
}

impl PartialConfigUpdate {
    /// True if the patch names a network-identity field
    #[must_use]
    pub const fn has_network_identity(&self) -> bool {
        self.wifi_ssid.is_some() || self.wifi_password.is_some() || self.device_id.is_some()
    }

    /// True if both network credentials are present, which requests a reconnection
    #[must_use]
    pub const fn has_wifi_credentials(&self) -> bool {
        self.wifi_ssid.is_some() && self.wifi_password.is_some()
    }

    /// True if no field is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.wifi_ssid.is_none()
            && self.wifi_password.is_none()
            && self.device_id.is_none()
            && self.api_endpoint.is_none()
            && self.api_key.is_none()
            && self.transmit_interval.is_none()
            && self.motion_threshold.is_none()
    }
}

/// Truncate to at most `capacity` bytes, cutting at the first NUL and on a char boundary
#[must_use]
pub fn bounded(value: &str, capacity: usize) -> String {
    let value = value.split('\0').next().unwrap_or_default();
    if value.len() <= capacity {
        return value.to_string();
    }
    let mut end = capacity;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

impl DeviceConfig {
    /// Overlay a patch field by field and return the result
    ///
    /// Strings are truncated to their capacity. `paired` becomes true when the
    /// patch carries a network-identity field and is never cleared here.
    #[must_use]
    pub fn apply_patch(&self, patch: &PartialConfigUpdate) -> Self {
        let mut next = self.clone();

        if let Some(ssid) = &patch.wifi_ssid {
            next.wifi_ssid = bounded(ssid, WIFI_SSID_CAPACITY);
        }
        if let Some(password) = &patch.wifi_password {
            next.wifi_password = bounded(password, WIFI_PASSWORD_CAPACITY);
        }
        if let Some(device_id) = &patch.device_id {
            next.device_id = bounded(device_id, DEVICE_ID_CAPACITY);
        }
        if let Some(endpoint) = &patch.api_endpoint {
            next.api_endpoint = bounded(endpoint, API_ENDPOINT_CAPACITY);
        }
        if let Some(key) = &patch.api_key {
            next.api_key = bounded(key, API_KEY_CAPACITY);
        }
        if let Some(interval) = patch.transmit_interval.filter(|i| *i > 0) {
            next.transmit_interval = interval;
        }
        if let Some(threshold) = patch
            .motion_threshold
            .filter(|t| t.is_finite() && *t >= 0.0)
        {
            next.motion_threshold = threshold;
        }

        if patch.has_network_identity() {
            next.paired = true;
        }

        next
    }

    /// Encode as a persisted record
    #[must_use]
    pub fn to_record(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RECORD_SIZE);

        buf.put_slice(&RECORD_MAGIC);
        put_fixed_str(&mut buf, &self.wifi_ssid, WIFI_SSID_CAPACITY);
        put_fixed_str(&mut buf, &self.wifi_password, WIFI_PASSWORD_CAPACITY);
        put_fixed_str(&mut buf, &self.device_id, DEVICE_ID_CAPACITY);
        put_fixed_str(&mut buf, &self.api_endpoint, API_ENDPOINT_CAPACITY);
        put_fixed_str(&mut buf, &self.api_key, API_KEY_CAPACITY);
        buf.put_u8(u8::from(self.paired));
        buf.put_u32_le(self.transmit_interval);
        buf.put_f32_le(self.motion_threshold);

        let digest = record_digest(&buf);
        buf.put_slice(&digest);

        buf.freeze()
    }

    /// Decode a persisted record
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] if the record has the wrong size or magic,
    /// fails its digest check, or holds a string that is not UTF-8.
    pub fn from_record(data: &[u8]) -> Result<Self> {
        if data.len() != RECORD_SIZE {
            return Err(TrackerError::Storage(format!(
                "Record has {} bytes, expected {RECORD_SIZE}",
                data.len()
            )));
        }

        let (body, digest) = data.split_at(RECORD_BODY_SIZE);
        if record_digest(body) != digest {
            return Err(TrackerError::Storage("Record digest mismatch".to_string()));
        }

        let mut buf = body;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != RECORD_MAGIC {
            return Err(TrackerError::Storage(format!(
                "Unknown record magic {magic:02X?}"
            )));
        }

        let wifi_ssid = get_fixed_str(&mut buf, WIFI_SSID_CAPACITY)?;
        let wifi_password = get_fixed_str(&mut buf, WIFI_PASSWORD_CAPACITY)?;
        let device_id = get_fixed_str(&mut buf, DEVICE_ID_CAPACITY)?;
        let api_endpoint = get_fixed_str(&mut buf, API_ENDPOINT_CAPACITY)?;
        let api_key = get_fixed_str(&mut buf, API_KEY_CAPACITY)?;
        let paired = buf.get_u8() != 0;
        let transmit_interval = match buf.get_u32_le() {
            0 => DEFAULT_TRANSMIT_INTERVAL,
            interval => interval,
        };
        let motion_threshold = match buf.get_f32_le() {
            t if t.is_finite() && t >= 0.0 => t,
            _ => DEFAULT_MOTION_THRESHOLD,
        };

        Ok(Self {
            wifi_ssid,
            wifi_password,
            device_id,
            api_endpoint,
            api_key,
            paired,
            transmit_interval,
            motion_threshold,
        })
    }
}

fn record_digest(body: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = md5::Context::new();
    hasher.consume(body);
    hasher.finalize().0
}

fn put_fixed_str(buf: &mut BytesMut, value: &str, capacity: usize) {
    let value = bounded(value, capacity);
    buf.put_slice(value.as_bytes());
    buf.put_bytes(0, capacity + 1 - value.len());
}

fn get_fixed_str(buf: &mut &[u8], capacity: usize) -> Result<String> {
    let field = &buf[..=capacity];
    let end = field.iter().position(|b| *b == 0).unwrap_or(capacity);
    let value = std::str::from_utf8(&field[..end])
        .map_err(|e| TrackerError::Storage(format!("Record holds invalid text: {e}")))?
        .to_string();
    buf.advance(capacity + 1);
    Ok(value)
}

/// Opaque non-volatile store for the configuration record
///
/// Implementations must make `write_record` atomic from the caller's view: a
/// subsequent `read_record` returns either the previous or the new record.
pub trait ConfigStorage {
    /// Read the stored record, `None` if nothing was ever written
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] if the backing store cannot be read.
    fn read_record(&mut self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored record
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] if the write did not complete.
    fn write_record(&mut self, record: &[u8]) -> Result<()>;
}

impl<T: ConfigStorage + ?Sized> ConfigStorage for Box<T> {
    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).read_record()
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        (**self).write_record(record)
    }
}

/// Sole owner of the device configuration
pub struct ConfigStore<S> {
    storage: S,
    current: DeviceConfig,
}

impl<S: ConfigStorage> ConfigStore<S> {
    /// Open the store and load the persisted configuration
    pub fn open(storage: S) -> Self {
        let mut store = Self {
            storage,
            current: DeviceConfig::default(),
        };
        store.current = store.load();
        store
    }

    /// Current in-memory configuration
    #[must_use]
    pub const fn current(&self) -> &DeviceConfig {
        &self.current
    }

    /// Read the persisted configuration, falling back to defaults
    ///
    /// A missing, unreadable or corrupt record never errors out; the default
    /// configuration is returned instead.
    pub fn load(&mut self) -> DeviceConfig {
        match self.storage.read_record() {
            Ok(Some(record)) => match DeviceConfig::from_record(&record) {
                Ok(config) => {
                    debug!(paired = config.paired, "Loaded configuration record");
                    config
                }
                Err(e) => {
                    warn!("Stored configuration is unusable, using defaults: {}", e);
                    DeviceConfig::default()
                }
            },
            Ok(None) => {
                info!("No stored configuration, using defaults");
                DeviceConfig::default()
            }
            Err(e) => {
                warn!("Failed to read configuration, using defaults: {}", e);
                DeviceConfig::default()
            }
        }
    }

    /// Persist a full configuration as one record
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] if the storage collaborator fails.
    pub fn save(&mut self, config: &DeviceConfig) -> Result<()> {
        let record = config.to_record();
        self.storage.write_record(&record).inspect_err(|e| {
            error!("Failed to persist configuration: {}", e);
        })
    }

    /// Apply a patch, make it current and persist it
    ///
    /// The patched configuration stays current even if persisting fails.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] if the record could not be written.
    pub fn update(&mut self, patch: &PartialConfigUpdate) -> Result<&DeviceConfig> {
        self.current = self.current.apply_patch(patch);
        let snapshot = self.current.clone();
        self.save(&snapshot)?;
        Ok(&self.current)
    }

    /// Reset to defaults and persist
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] if the record could not be written.
    pub fn factory_reset(&mut self) -> Result<()> {
        self.current = Self::factory_defaults();
        let snapshot = self.current.clone();
        self.save(&snapshot)
    }

    /// The configuration a factory reset produces
    #[must_use]
    pub fn factory_defaults() -> DeviceConfig {
        DeviceConfig::default()
    }

    /// Access the storage collaborator
    pub const fn storage(&self) -> &S {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemoryStorage;

    fn identity_patch() -> PartialConfigUpdate {
        PartialConfigUpdate {
            wifi_ssid: Some("HomeNet".to_string()),
            wifi_password: Some("hunter22".to_string()),
            device_id: Some("2f1b9c1e-6a53-4f59-9d0e-3b1f0c7d2a11".to_string()),
            api_endpoint: Some("https://api.example.com/v1/track".to_string()),
            api_key: Some("sk_live_0123456789".to_string()),
            transmit_interval: Some(120),
            motion_threshold: Some(0.8),
        }
    }

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert!(!config.paired);
        assert_eq!(config.transmit_interval, 60);
        assert!((config.motion_threshold - 0.5).abs() < f32::EPSILON);
        assert!(config.wifi_ssid.is_empty());
    }

    #[test]
    fn test_patch_is_idempotent() {
        let patch = identity_patch();
        let once = DeviceConfig::default().apply_patch(&patch);
        let twice = once.apply_patch(&patch);
        assert_eq!(once, twice);
        assert!(once.paired);
    }

    #[test]
    fn test_partial_patch_leaves_other_fields() {
        let patch = PartialConfigUpdate {
            transmit_interval: Some(120),
            ..Default::default()
        };
        let base = DeviceConfig::default();
        let patched = base.apply_patch(&patch);

        assert_eq!(patched.transmit_interval, 120);
        assert!(!patched.paired);
        assert_eq!(patched.wifi_ssid, base.wifi_ssid);
        assert_eq!(patched.api_key, base.api_key);
    }

    #[test]
    fn test_out_of_bounds_numbers_keep_prior_value() {
        let patch = PartialConfigUpdate {
            transmit_interval: Some(0),
            motion_threshold: Some(-1.0),
            ..Default::default()
        };
        let patched = DeviceConfig::default().apply_patch(&patch);
        assert_eq!(patched.transmit_interval, DEFAULT_TRANSMIT_INTERVAL);
        assert!((patched.motion_threshold - DEFAULT_MOTION_THRESHOLD).abs() < f32::EPSILON);
    }

    #[test]
    fn test_ssid_truncated_without_overflow() {
        let long_ssid = "A".repeat(40);
        let patch = PartialConfigUpdate {
            wifi_ssid: Some(long_ssid),
            wifi_password: Some("pw".to_string()),
            ..Default::default()
        };
        let patched = DeviceConfig::default().apply_patch(&patch);
        assert_eq!(patched.wifi_ssid.len(), WIFI_SSID_CAPACITY);
        assert_eq!(patched.wifi_password, "pw");

        let record = patched.to_record();
        let ssid_start = RECORD_MAGIC.len();
        assert_eq!(record[ssid_start + WIFI_SSID_CAPACITY], 0);
        let password_start = ssid_start + WIFI_SSID_CAPACITY + 1;
        assert_eq!(&record[password_start..password_start + 2], b"pw");
    }

    #[test]
    fn test_bounded_respects_char_boundaries() {
        let value = "é".repeat(20);
        let truncated = bounded(&value, 31);
        assert_eq!(truncated.len(), 30);
        assert_eq!(bounded("abc\0def", 10), "abc");
    }

    #[test]
    fn test_record_round_trip() {
        let config = DeviceConfig::default().apply_patch(&identity_patch());
        let record = config.to_record();
        assert_eq!(record.len(), RECORD_SIZE);
        assert_eq!(DeviceConfig::from_record(&record).unwrap(), config);
    }

    #[test]
    fn test_corrupt_record_rejected() {
        let mut record = DeviceConfig::default().to_record().to_vec();
        record[10] ^= 0xFF;
        assert!(matches!(
            DeviceConfig::from_record(&record),
            Err(TrackerError::Storage(_))
        ));
        assert!(DeviceConfig::from_record(&record[..20]).is_err());
    }

    #[test]
    fn test_load_falls_back_on_corrupt_storage() {
        let storage = MemoryStorage::with_record(vec![0xAB; RECORD_SIZE]);
        let store = ConfigStore::open(storage);
        assert_eq!(store.current(), &DeviceConfig::default());
    }

    #[test]
    fn test_save_then_reload() {
        let mut store = ConfigStore::open(MemoryStorage::default());
        store.update(&identity_patch()).unwrap();
        let saved = store.current().clone();

        let reloaded = store.load();
        assert_eq!(reloaded, saved);
        assert_eq!(store.storage().writes(), 1);
    }

    #[test]
    fn test_failed_save_keeps_memory_authoritative() {
        let storage = MemoryStorage::default();
        storage.fail_writes(true);
        let mut store = ConfigStore::open(storage);

        let result = store.update(&identity_patch());
        assert!(matches!(result, Err(TrackerError::Storage(_))));
        assert_eq!(store.current().wifi_ssid, "HomeNet");
        assert!(store.current().paired);
    }

    #[test]
    fn test_factory_reset_persists_defaults() {
        let mut store = ConfigStore::open(MemoryStorage::default());
        store.update(&identity_patch()).unwrap();
        store.factory_reset().unwrap();

        assert_eq!(store.current(), &DeviceConfig::default());
        assert_eq!(store.load(), DeviceConfig::default());
    }
}
