//! # Persisted Gateway Settings
//!
//! Device identifier filter, radio frequency and pre-shared key, stored as a
//! small JSON document:
//!
//! ```json
//! {"id2": 321, "freq": 868000000, "p2p_key": "00...00"}
//! ```
//!
//! Loading never fails startup. Missing or unreadable files are replaced by
//! defaults, invalid fields fall back to their defaults, and the corrected
//! document is written back.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::packet::cipher::KEY_SIZE;

/// Lowest frequency accepted by the transceiver (Hz)
pub const MIN_FREQUENCY_HZ: u32 = 100_000_000;

/// Highest frequency accepted by the transceiver (Hz)
pub const MAX_FREQUENCY_HZ: u32 = 1_000_000_000;

/// Default frequency (EU868)
pub const DEFAULT_FREQUENCY_HZ: u32 = 868_000_000;

/// Values below this are legacy MHz entries
const LEGACY_MHZ_LIMIT: u32 = 1000;

/// Gateway settings as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Device identifier accepted for relay
    #[serde(rename = "id2")]
    pub device_id2: u32,

    /// LoRa frequency in Hz
    #[serde(rename = "freq")]
    pub radio_frequency_hz: u32,

    /// Pre-shared key as 64 hex characters
    #[serde(rename = "p2p_key")]
    pub preshared_key_hex: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            device_id2: 0,
            radio_frequency_hz: DEFAULT_FREQUENCY_HZ,
            preshared_key_hex: "00".repeat(KEY_SIZE),
        }
    }
}

/// Check a frequency against the transceiver band
pub fn validate_frequency(freq_hz: u32) -> Result<()> {
    if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&freq_hz) {
        return Err(GatewayError::ConfigInvalid(format!(
            "frequency {} Hz outside {}..={} Hz",
            freq_hz, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ
        )));
    }
    Ok(())
}

/// Decode a 64-character hex key into raw bytes
///
/// # Errors
///
/// Returns `ConfigInvalid` unless the text is exactly 32 bytes of hex.
pub fn parse_key(key_hex: &str) -> Result<[u8; KEY_SIZE]> {
    let mut key = [0u8; KEY_SIZE];
    hex::decode_to_slice(key_hex, &mut key).map_err(|e| {
        GatewayError::ConfigInvalid(format!(
            "p2p_key must be {} hex characters: {}",
            KEY_SIZE * 2,
            e
        ))
    })?;
    Ok(key)
}

impl GatewayConfig {
    /// Raw pre-shared key
    ///
    /// Falls back to the all-zero key if the stored text is invalid, which
    /// [`SettingsStore::load`] already prevents.
    pub fn preshared_key(&self) -> [u8; KEY_SIZE] {
        parse_key(&self.preshared_key_hex).unwrap_or([0u8; KEY_SIZE])
    }

    /// Repair invalid fields in place
    ///
    /// # Returns
    ///
    /// * `(bool, Vec<GatewayError>)` - whether anything changed, and the
    ///   validation errors that caused a field to be reset
    fn sanitize(&mut self) -> (bool, Vec<GatewayError>) {
        let mut changed = false;
        let mut problems = Vec::new();

        if self.radio_frequency_hz < LEGACY_MHZ_LIMIT {
            let migrated = self.radio_frequency_hz.saturating_mul(1_000_000);
            info!(
                "Converting legacy frequency {} MHz to {} Hz",
                self.radio_frequency_hz, migrated
            );
            self.radio_frequency_hz = migrated;
            changed = true;
        }

        if let Err(e) = validate_frequency(self.radio_frequency_hz) {
            problems.push(e);
            self.radio_frequency_hz = DEFAULT_FREQUENCY_HZ;
            changed = true;
        }

        if let Err(e) = parse_key(&self.preshared_key_hex) {
            problems.push(e);
            self.preshared_key_hex = GatewayConfig::default().preshared_key_hex;
            changed = true;
        }

        (changed, problems)
    }
}

/// File-backed settings shared by the gateway loop and the console
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    data: GatewayConfig,
}

impl SettingsStore {
    /// Load settings from `path`, creating or repairing the file as needed
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loko_gateway::settings::SettingsStore;
    ///
    /// let store = SettingsStore::load("settings.json");
    /// println!("Filtering on ID2={}", store.get().device_id2);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();

        let (mut data, mut dirty) = match Self::read(&path) {
            Ok(data) => (data, false),
            Err(e) => {
                warn!("{}", e);
                warn!("Settings file not found, creating new one with default settings");
                (GatewayConfig::default(), true)
            }
        };

        let (changed, problems) = data.sanitize();
        for problem in &problems {
            warn!("{}, using default", problem);
        }
        dirty |= changed;

        let store = Self { path, data };
        if dirty {
            if let Err(e) = store.save() {
                warn!("Failed to persist settings: {}", e);
            }
        }

        info!("Loaded settings from {}: {:?}", store.path.display(), store.data);
        store
    }

    fn read(path: &Path) -> Result<GatewayConfig> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the current settings to disk
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.data)?;
        fs::write(&self.path, json)?;
        info!("Saved settings to {}: {:?}", self.path.display(), self.data);
        Ok(())
    }

    /// Current settings
    pub fn get(&self) -> &GatewayConfig {
        &self.data
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set the device identifier and persist
    pub fn set_device_id2(&mut self, id2: u32) -> Result<()> {
        self.data.device_id2 = id2;
        self.save()
    }

    /// Set the radio frequency and persist
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for frequencies outside the transceiver band;
    /// the stored value is left untouched.
    pub fn set_frequency_hz(&mut self, freq_hz: u32) -> Result<()> {
        validate_frequency(freq_hz)?;
        self.data.radio_frequency_hz = freq_hz;
        self.save()
    }

    /// Set the pre-shared key and persist
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` unless `key_hex` is 64 hex characters.
    pub fn set_preshared_key_hex(&mut self, key_hex: &str) -> Result<()> {
        parse_key(key_hex)?;
        self.data.preshared_key_hex = key_hex.to_string();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_path(dir: &TempDir) -> PathBuf {
        dir.path().join("settings.json")
    }

    #[test]
    fn test_default_settings() {
        let defaults = GatewayConfig::default();
        assert_eq!(defaults.device_id2, 0);
        assert_eq!(defaults.radio_frequency_hz, 868_000_000);
        assert_eq!(defaults.preshared_key_hex, "0".repeat(64));
        assert_eq!(defaults.preshared_key(), [0u8; 32]);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_string(&GatewayConfig::default()).unwrap();
        assert!(json.contains("\"id2\":0"));
        assert!(json.contains("\"freq\":868000000"));
        assert!(json.contains("\"p2p_key\""));
    }

    #[test]
    fn test_missing_file_creates_defaults() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);

        let store = SettingsStore::load(&path);
        assert_eq!(store.get(), &GatewayConfig::default());
        assert!(path.exists(), "Defaults should be persisted");
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        fs::write(&path, "{not json").unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.get(), &GatewayConfig::default());

        let reread: GatewayConfig =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread, GatewayConfig::default());
    }

    #[test]
    fn test_load_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        let key = "ab".repeat(32);
        fs::write(
            &path,
            format!(r#"{{"id2": 321, "freq": 915000000, "p2p_key": "{}"}}"#, key),
        )
        .unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.get().device_id2, 321);
        assert_eq!(store.get().radio_frequency_hz, 915_000_000);
        assert_eq!(store.get().preshared_key(), [0xAB; 32]);
    }

    #[test]
    fn test_legacy_mhz_frequency_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        fs::write(
            &path,
            format!(r#"{{"id2": 1, "freq": 868, "p2p_key": "{}"}}"#, "00".repeat(32)),
        )
        .unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.get().radio_frequency_hz, 868_000_000);
        assert!(fs::read_to_string(&path).unwrap().contains("868000000"));
    }

    #[test]
    fn test_out_of_band_frequency_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        fs::write(
            &path,
            format!(r#"{{"id2": 5, "freq": 2400000000, "p2p_key": "{}"}}"#, "11".repeat(32)),
        )
        .unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.get().radio_frequency_hz, DEFAULT_FREQUENCY_HZ);
        // Valid fields survive
        assert_eq!(store.get().device_id2, 5);
        assert_eq!(store.get().preshared_key(), [0x11; 32]);
    }

    #[test]
    fn test_short_key_fails_closed() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        fs::write(&path, r#"{"id2": 5, "freq": 868000000, "p2p_key": "abcd"}"#).unwrap();

        let store = SettingsStore::load(&path);
        assert_eq!(store.get().preshared_key_hex, "00".repeat(32));
        assert_eq!(store.get().device_id2, 5);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key(&"0f".repeat(32)).unwrap(), [0x0F; 32]);
        assert_eq!(parse_key(&"0F".repeat(32)).unwrap(), [0x0F; 32]);
        assert!(matches!(parse_key("zz"), Err(GatewayError::ConfigInvalid(_))));
        assert!(parse_key(&"00".repeat(31)).is_err());
        assert!(parse_key(&"00".repeat(33)).is_err());
        assert!(parse_key(&format!("{}g0", "00".repeat(31))).is_err());
    }

    #[test]
    fn test_validate_frequency() {
        assert!(validate_frequency(MIN_FREQUENCY_HZ).is_ok());
        assert!(validate_frequency(MAX_FREQUENCY_HZ).is_ok());
        assert!(validate_frequency(MIN_FREQUENCY_HZ - 1).is_err());
        assert!(validate_frequency(MAX_FREQUENCY_HZ + 1).is_err());
    }

    #[test]
    fn test_setters_persist() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);

        let mut store = SettingsStore::load(&path);
        store.set_device_id2(321).unwrap();
        store.set_frequency_hz(433_000_000).unwrap();
        store.set_preshared_key_hex(&"7e".repeat(32)).unwrap();

        let reloaded = SettingsStore::load(&path);
        assert_eq!(reloaded.get().device_id2, 321);
        assert_eq!(reloaded.get().radio_frequency_hz, 433_000_000);
        assert_eq!(reloaded.get().preshared_key(), [0x7E; 32]);
    }

    #[test]
    fn test_invalid_setters_leave_state_untouched() {
        let dir = TempDir::new().unwrap();
        let mut store = SettingsStore::load(settings_path(&dir));

        assert!(store.set_frequency_hz(50_000_000).is_err());
        assert!(store.set_preshared_key_hex("1234").is_err());
        assert_eq!(store.get(), &GatewayConfig::default());
    }
}
