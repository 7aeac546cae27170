//! # Tracker Settings Model
//!
//! Typed mirror of the JSON document the tracker firmware exchanges on both the
//! serial link (`g<json>` / `s<json>`) and the HTTP admin page
//! (`/configuration.json`). Field names on the wire are exactly the ones the
//! device uses, so the serde renames below are part of the protocol.
//!
//! ## Structure
//!
//! - [`Settings`] - root aggregate, one device's full configuration snapshot
//! - [`Beacon`] / [`SmartBeacon`] - ordered APRS identity profiles
//! - [`Lora`] - radio parameters
//! - [`Other`] - operational toggles and timers
//! - [`PttTrigger`] - push-to-talk GPIO trigger
//! - [`Bme`] - environmental telemetry
//! - [`Notification`] - LED and buzzer wiring
//!
//! Ranges and length bounds live in [`schema`]; the types here only guarantee
//! that a value has the right shape.
//!
//! ```rust
//! use trackerconf::settings::Settings;
//!
//! let settings = Settings::default();
//! assert_eq!(settings.beacons.len(), 1);
//! assert_eq!(settings.lora.frequency, 433_775_000);
//! ```

pub mod schema;

use serde::{Deserialize, Serialize};

/// Full configuration snapshot of one tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Transmission and display order is the vector order.
    pub beacons: Vec<Beacon>,
    pub lora: Lora,
    pub other: Other,
    #[serde(rename = "pttTrigger")]
    pub ptt_trigger: PttTrigger,
    pub bme: Bme,
    pub notification: Notification,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            beacons: vec![Beacon::default()],
            lora: Lora::default(),
            other: Other::default(),
            ptt_trigger: PttTrigger::default(),
            bme: Bme::default(),
            notification: Notification::default(),
        }
    }
}

/// One APRS station profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub callsign: String,
    pub symbol: String,
    pub overlay: String,
    pub comment: String,
    #[serde(rename = "smart_beacon")]
    pub smart_beacon: SmartBeacon,
}

impl Default for Beacon {
    fn default() -> Self {
        Self {
            callsign: "NOCALL-7".to_string(),
            symbol: ">".to_string(),
            overlay: "/".to_string(),
            comment: String::new(),
            smart_beacon: SmartBeacon::default(),
        }
    }
}

/// Adaptive transmit-rate thresholds. Data only; the firmware applies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartBeacon {
    pub active: bool,
    pub slow_rate: u16,
    pub slow_speed: u16,
    pub fast_rate: u16,
    pub fast_speed: u16,
    pub min_tx_dist: u16,
    pub min_delta_beacon: u16,
    pub turn_min_deg: u16,
    pub turn_slope: u16,
}

impl Default for SmartBeacon {
    fn default() -> Self {
        Self {
            active: true,
            slow_rate: 120,
            slow_speed: 10,
            fast_rate: 60,
            fast_speed: 70,
            min_tx_dist: 100,
            min_delta_beacon: 12,
            turn_min_deg: 10,
            turn_slope: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lora {
    /// Hz
    pub frequency: u32,
    pub spreading_factor: u8,
    /// Hz
    pub signal_bandwidth: u32,
    pub coding_rate4: u8,
    /// dBm
    pub power: u8,
}

impl Default for Lora {
    fn default() -> Self {
        Self {
            frequency: 433_775_000,
            spreading_factor: 12,
            signal_bandwidth: 125_000,
            coding_rate4: 5,
            power: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Other {
    pub send_altitude: bool,
    pub send_battery_info: bool,
    pub show_symbol_on_screen: bool,
    pub display_eco_mode: bool,
    pub bluetooth: bool,
    pub disable_gps: bool,
    pub simplified_tracker_mode: bool,
    /// APRS digipeater path, e.g. `WIDE1-1`.
    pub path: String,
    pub send_comment_after_x_beacons: u16,
    /// Seconds
    pub display_timeout: u16,
    /// Minutes
    pub standing_update_time: u16,
    /// Minutes
    pub non_smart_beacon_rate: u16,
    /// Minutes
    pub remember_station_time: u16,
    /// Kilometers
    pub max_distance_to_tracker: u16,
}

impl Default for Other {
    fn default() -> Self {
        Self {
            send_altitude: true,
            send_battery_info: false,
            show_symbol_on_screen: true,
            display_eco_mode: true,
            bluetooth: true,
            disable_gps: true,
            simplified_tracker_mode: false,
            path: "WIDE1-1".to_string(),
            send_comment_after_x_beacons: 10,
            display_timeout: 60,
            standing_update_time: 15,
            non_smart_beacon_rate: 1,
            remember_station_time: 30,
            max_distance_to_tracker: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PttTrigger {
    pub active: bool,
    pub reverse: bool,
    #[serde(rename = "io_pin")]
    pub io_pin: u8,
    /// Milliseconds
    pub pre_delay: u16,
    /// Milliseconds
    pub post_delay: u16,
}

impl Default for PttTrigger {
    fn default() -> Self {
        Self {
            active: false,
            reverse: false,
            io_pin: 4,
            pre_delay: 0,
            post_delay: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bme {
    pub active: bool,
    pub send_telemetry: bool,
    /// Meters
    pub height_correction: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub led_tx: bool,
    pub led_tx_pin: u8,
    pub led_message: bool,
    pub led_message_pin: u8,
    pub buzzer_active: bool,
    pub buzzer_pin_tone: u8,
    pub buzzer_pin_vcc: u8,
    pub boot_up_beep: bool,
    pub tx_beep: bool,
    pub message_rx_beep: bool,
    pub station_beep: bool,
    pub low_battery_beep: bool,
}

impl Default for Notification {
    fn default() -> Self {
        Self {
            led_tx: false,
            led_tx_pin: 13,
            led_message: false,
            led_message_pin: 2,
            buzzer_active: false,
            buzzer_pin_tone: 33,
            buzzer_pin_vcc: 25,
            boot_up_beep: false,
            tx_beep: false,
            message_rx_beep: false,
            station_beep: false,
            low_battery_beep: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_device_json() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert!(value.get("pttTrigger").is_some());
        assert_eq!(value["pttTrigger"]["io_pin"], 4);
        assert_eq!(value["beacons"][0]["smart_beacon"]["minDeltaBeacon"], 12);
        assert_eq!(value["lora"]["codingRate4"], 5);
        assert_eq!(value["other"]["sendCommentAfterXBeacons"], 10);
        assert_eq!(value["other"]["disableGps"], true);
        assert_eq!(value["notification"]["buzzerPinVcc"], 25);
        assert_eq!(value["bme"]["heightCorrection"], 0);
    }

    #[test]
    fn extra_device_keys_are_ignored() {
        let mut value = serde_json::to_value(Settings::default()).unwrap();
        value["wifiAP"] = serde_json::json!({"active": false, "password": "x"});
        value["lora"]["unknownFutureKey"] = serde_json::json!(1);
        let parsed: Settings = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn missing_group_is_rejected() {
        let mut value = serde_json::to_value(Settings::default()).unwrap();
        value.as_object_mut().unwrap().remove("bme");
        assert!(serde_json::from_value::<Settings>(value).is_err());
    }
}
