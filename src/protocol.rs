use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{
    ble::{Characteristic, PeripheralLink},
    config::{ConfigStorage, ConfigStore, DeviceConfig, PartialConfigUpdate},
    error::{Result, TrackerError},
    types::{AlertPattern, HardwareCapabilities, TelemetrySample},
    FIRMWARE_VERSION,
};

/// Buzzer duration used when a `buzzer` command omits `duration`
pub const DEFAULT_BUZZER_DURATION_MS: u32 = 1000;

/// Commands accepted on the command characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Restart after a short delay
    Reset,
    /// Reset configuration to defaults, persist, then restart
    FactoryReset,
    /// Play the local alert if the board has one
    Locate,
    /// Sound the buzzer for a duration; clamping is left to the board
    Buzzer {
        /// Tone length in milliseconds
        duration_ms: u32,
    },
}

/// Side effects requested by an inbound write, executed by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Configuration changed in memory (persisted or not)
    ConfigApplied,
    /// Configuration returned to factory defaults
    ConfigReset,
    /// Join the newly configured network; fire-and-forget
    Reconnect {
        /// Network SSID
        ssid: String,
        /// Network passphrase
        password: String,
    },
    /// Restart after the flush delay
    ScheduleRestart,
    /// Play an indicator pattern
    Alert(AlertPattern),
}

/// Readable view of the configuration; secrets are never included
#[derive(Debug, Serialize)]
struct ConfigView<'a> {
    wifi_ssid: &'a str,
    device_id: &'a str,
    api_endpoint: &'a str,
    paired: bool,
    transmit_interval: u32,
    motion_threshold: f32,
    firmware_version: &'static str,
}

impl<'a> From<&'a DeviceConfig> for ConfigView<'a> {
    fn from(config: &'a DeviceConfig) -> Self {
        Self {
            wifi_ssid: &config.wifi_ssid,
            device_id: &config.device_id,
            api_endpoint: &config.api_endpoint,
            paired: config.paired,
            transmit_interval: config.transmit_interval,
            motion_threshold: config.motion_threshold,
            firmware_version: FIRMWARE_VERSION,
        }
    }
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(TrackerError::Parse(format!(
            "Expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn reject(field: &'static str, reason: impl Into<String>) {
    let err = TrackerError::Validation {
        field,
        reason: reason.into(),
    };
    warn!("Ignoring field: {}", err);
}

fn string_field(map: &Map<String, Value>, field: &'static str) -> Option<String> {
    match map.get(field)? {
        Value::String(s) => Some(s.clone()),
        other => {
            reject(field, format!("expected string, got {}", json_kind(other)));
            None
        }
    }
}

/// Parse a config characteristic write into a patch
///
/// Unknown keys are ignored. A field of the wrong type or out of bounds is
/// dropped on its own; the rest of the patch still applies.
///
/// # Errors
///
/// Returns [`TrackerError::Parse`] if the payload is not a JSON object.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_config_write(payload: &[u8]) -> Result<PartialConfigUpdate> {
    let map = parse_object(payload)?;

    let transmit_interval = map.get("transmit_interval").and_then(|value| {
        match value.as_u64().map(u32::try_from) {
            Some(Ok(interval)) if interval > 0 => Some(interval),
            _ => {
                reject("transmit_interval", format!("expected integer > 0, got {value}"));
                None
            }
        }
    });

    let motion_threshold = map.get("motion_threshold").and_then(|value| {
        match value.as_f64().map(|t| t as f32) {
            Some(threshold) if threshold.is_finite() && threshold >= 0.0 => Some(threshold),
            _ => {
                reject("motion_threshold", format!("expected number >= 0, got {value}"));
                None
            }
        }
    });

    Ok(PartialConfigUpdate {
        wifi_ssid: string_field(&map, "wifi_ssid"),
        wifi_password: string_field(&map, "wifi_password"),
        device_id: string_field(&map, "device_id"),
        api_endpoint: string_field(&map, "api_endpoint"),
        api_key: string_field(&map, "api_key"),
        transmit_interval,
        motion_threshold,
    })
}

/// Parse a command characteristic write
///
/// Returns `Ok(None)` for a missing or unrecognized command.
///
/// # Errors
///
/// Returns [`TrackerError::Parse`] if the payload is not a JSON object.
pub fn parse_command(payload: &[u8]) -> Result<Option<Command>> {
    let map = parse_object(payload)?;

    let Some(name) = map.get("command").and_then(Value::as_str) else {
        debug!("Command write without a command name");
        return Ok(None);
    };

    let command = match name {
        "reset" => Command::Reset,
        "factory_reset" => Command::FactoryReset,
        "locate" => Command::Locate,
        "buzzer" => {
            let duration_ms = match map.get("duration") {
                None => DEFAULT_BUZZER_DURATION_MS,
                Some(value) => match value.as_u64().map(u32::try_from) {
                    Some(Ok(duration)) => duration,
                    _ => {
                        reject("duration", format!("expected milliseconds, got {value}"));
                        DEFAULT_BUZZER_DURATION_MS
                    }
                },
            };
            Command::Buzzer { duration_ms }
        }
        other => {
            info!(command = other, "Ignoring unknown command");
            return Ok(None);
        }
    };

    Ok(Some(command))
}

/// Serialize a telemetry sample as the status payload
///
/// # Errors
///
/// Returns [`TrackerError::Parse`] if serialization fails. Non-finite floats
/// would serialize as `null`, so samples should come from
/// [`crate::telemetry::TelemetrySampler::snapshot`], which zeroes them.
pub fn status_payload(sample: &TelemetrySample) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(sample)?)
}

/// Serialize the readable view of a configuration
///
/// # Errors
///
/// Returns [`TrackerError::Parse`] if a float is not representable in JSON.
pub fn config_payload(config: &DeviceConfig) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ConfigView::from(config))?)
}

/// Owner of the config, status and command characteristics
#[derive(Debug)]
pub struct ProtocolService {
    capabilities: HardwareCapabilities,
    last_status: Option<TelemetrySample>,
    rejected_writes: u32,
}

impl ProtocolService {
    /// Create the service for a board with the given capabilities
    #[must_use]
    pub const fn new(capabilities: HardwareCapabilities) -> Self {
        Self {
            capabilities,
            last_status: None,
            rejected_writes: 0,
        }
    }

    /// Last sample pushed over the status characteristic
    #[must_use]
    pub const fn last_status(&self) -> Option<&TelemetrySample> {
        self.last_status.as_ref()
    }

    /// Number of writes rejected as malformed
    #[must_use]
    pub const fn rejected_writes(&self) -> u32 {
        self.rejected_writes
    }

    /// Handle a config characteristic write
    ///
    /// The characteristic accepts `api_key` without pairing or bonding; that
    /// exposure is known and left as is.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Parse`] if the payload is malformed; nothing is
    /// changed or persisted in that case.
    pub fn handle_config_write<S: ConfigStorage>(
        &mut self,
        store: &mut ConfigStore<S>,
        payload: &[u8],
    ) -> Result<Vec<Effect>> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        info!("Received configuration data");

        let patch = parse_config_write(payload).inspect_err(|e| {
            self.rejected_writes += 1;
            warn!("Rejecting configuration write: {}", e);
        })?;

        log_patch(&patch);

        if let Err(e) = store.update(&patch) {
            error!("Configuration applied but not persisted: {}", e);
        } else {
            info!("Configuration updated and saved");
        }

        let mut effects = vec![Effect::ConfigApplied];
        if patch.has_wifi_credentials() {
            let config = store.current();
            effects.push(Effect::Reconnect {
                ssid: config.wifi_ssid.clone(),
                password: config.wifi_password.clone(),
            });
        }
        Ok(effects)
    }

    /// Handle a command characteristic write
    ///
    /// Unknown commands are ignored and change nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Parse`] if the payload is malformed.
    pub fn handle_command_write<S: ConfigStorage>(
        &mut self,
        store: &mut ConfigStore<S>,
        payload: &[u8],
    ) -> Result<Vec<Effect>> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let command = parse_command(payload).inspect_err(|e| {
            self.rejected_writes += 1;
            warn!("Rejecting command write: {}", e);
        })?;

        let Some(command) = command else {
            return Ok(Vec::new());
        };
        info!(?command, "Received command");

        Ok(self.dispatch(store, command))
    }

    fn dispatch<S: ConfigStorage>(
        &self,
        store: &mut ConfigStore<S>,
        command: Command,
    ) -> Vec<Effect> {
        match command {
            Command::Reset => {
                info!("Resetting device...");
                vec![Effect::ScheduleRestart]
            }
            Command::FactoryReset => {
                info!("Performing factory reset...");
                if let Err(e) = store.factory_reset() {
                    error!("Factory defaults not persisted: {}", e);
                }
                vec![Effect::ConfigReset, Effect::ScheduleRestart]
            }
            Command::Locate => {
                if self.capabilities.can_alert() {
                    vec![Effect::Alert(AlertPattern::LOCATE)]
                } else {
                    info!("Locate command acknowledged; no indicator hardware");
                    Vec::new()
                }
            }
            Command::Buzzer { duration_ms } => {
                if self.capabilities.has_buzzer {
                    info!(duration_ms, "Activating buzzer");
                    vec![Effect::Alert(AlertPattern::tone(duration_ms))]
                } else {
                    info!("Buzzer command acknowledged; no buzzer fitted");
                    Vec::new()
                }
            }
        }
    }

    /// Push a sample to the peer over the status characteristic
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Link`] if the notification could not be sent.
    pub fn publish_status<L: PeripheralLink + ?Sized>(
        &mut self,
        link: &mut L,
        sample: TelemetrySample,
    ) -> Result<()> {
        let payload = status_payload(&sample)?;
        link.notify(Characteristic::Status, &payload)?;
        debug!(bytes = payload.len(), "Status notified");
        self.last_status = Some(sample);
        Ok(())
    }

    /// Refresh the readable value of the config characteristic
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Link`] if the value could not be stored.
    pub fn publish_config<L: PeripheralLink + ?Sized>(
        &self,
        link: &mut L,
        config: &DeviceConfig,
    ) -> Result<()> {
        let payload = config_payload(config)?;
        link.set_value(Characteristic::Config, &payload)
    }
}

fn log_patch(patch: &PartialConfigUpdate) {
    if let Some(ssid) = &patch.wifi_ssid {
        info!(ssid = %ssid, "WiFi SSID set");
    }
    if let Some(password) = &patch.wifi_password {
        info!(len = password.len(), "WiFi password set");
    }
    if let Some(device_id) = &patch.device_id {
        info!(device_id = %device_id, "Device ID set");
    }
    if let Some(endpoint) = &patch.api_endpoint {
        info!(endpoint = %endpoint, "API endpoint set");
    }
    if patch.api_key.is_some() {
        info!("API key updated");
    }
    if let Some(interval) = patch.transmit_interval {
        info!(seconds = interval, "Transmit interval set");
    }
    if let Some(threshold) = patch.motion_threshold {
        info!(threshold, "Motion threshold set");
    }
}
