use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::device::Device;

/// Current verdict for one device, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub device_id: i32,
    pub is_online: bool,
    #[serde(rename = "lastChecked")]
    pub checked_at: DateTime<Utc>,
}

impl From<&Device> for StatusSnapshot {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.id,
            is_online: device.is_online,
            checked_at: device.last_communication,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    WentOffline,
    CameOnline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub device_id: i32,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub direction: Direction,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionEvent {
    /// `None` when the verdict did not change.
    pub fn between(device: &Device, was_online: bool, at: DateTime<Utc>) -> Option<Self> {
        let direction = match (was_online, device.is_online) {
            (true, false) => Direction::WentOffline,
            (false, true) => Direction::CameOnline,
            _ => return None,
        };

        Some(Self {
            device_id: device.id,
            name: device.name.clone(),
            address: device.address.clone(),
            port: device.port,
            direction,
            occurred_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device(is_online: bool) -> Device {
        Device {
            id: 4,
            name: "kiln".to_string(),
            address: "10.1.0.4".to_string(),
            port: 502,
            is_online,
            last_communication: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_snapshot_wire_format() {
        let value = serde_json::to_value(vec![StatusSnapshot::from(&device(false))]).unwrap();

        assert_eq!(
            value,
            serde_json::json!([{
                "deviceId": 4,
                "isOnline": false,
                "lastChecked": "2024-05-01T08:00:00Z"
            }])
        );
    }

    #[test]
    fn test_transition_only_on_change() {
        let now = Utc::now();

        assert!(TransitionEvent::between(&device(true), true, now).is_none());
        assert!(TransitionEvent::between(&device(false), false, now).is_none());
        assert_eq!(
            TransitionEvent::between(&device(false), true, now).map(|e| e.direction),
            Some(Direction::WentOffline)
        );
        assert_eq!(
            TransitionEvent::between(&device(true), false, now).map(|e| e.direction),
            Some(Direction::CameOnline)
        );
    }
}
