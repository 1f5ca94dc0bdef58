//! Models for the SmartThings API subset used by the engine.
//!
//! Scope: types only — no API client/server code.
//!
//! Notes
//! - All object schemas are modeled as strongly typed Rust structs/enums.
//! - Rule payloads serialize to the exact JSON the Rules API expects; the
//!   `RuleAction` enum is externally tagged so each action renders as
//!   `{"every": {...}}` or `{"command": {...}}`.

use serde::{Deserialize, Serialize};

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

// =====================
// Paged list envelope
// =====================

/// List endpoints wrap their results in `{"items": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    #[serde(rename = "locationId")]
    pub location_id: LocationId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "roomId", default)]
    pub room_id: Option<RoomId>,
}

// =====================
// Rules
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl DayOfWeek {
    /// The seven days in the canonical Sun→Sat order.
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sun,
        DayOfWeek::Mon,
        DayOfWeek::Tue,
        DayOfWeek::Wed,
        DayOfWeek::Thu,
        DayOfWeek::Fri,
        DayOfWeek::Sat,
    ];
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeReference {
    Sunrise,
    Sunset,
    Midnight,
    Noon,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalValue {
    pub integer: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub value: IntervalValue,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn minutes(value: i32) -> Self {
        Interval {
            value: IntervalValue { integer: value },
            unit: IntervalUnit::Minute,
        }
    }
}

/// Schedule clause of an `every` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificTime {
    pub reference: TimeReference,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offset: Option<Interval>,
    #[serde(rename = "daysOfWeek")]
    pub days_of_week: Vec<DayOfWeek>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EveryAction {
    pub specific: SpecificTime,
    pub actions: Vec<RuleAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAction {
    pub devices: Vec<DeviceId>,
    pub commands: Vec<DeviceCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Every(EveryAction),
    Command(CommandAction),
}

/// A rule payload, as sent to the create-rule endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub actions: Vec<RuleAction>,
}

/// The slice of a stored rule the engine cares about; create/list responses
/// carry more fields, which are ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub id: RuleId,
    pub name: String,
}

// =====================
// Device commands and status
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub component: String,
    pub capability: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl DeviceCommand {
    /// A `switch` capability command (`on` or `off`) for a component.
    pub fn switch(component: &str, command: &str) -> Self {
        DeviceCommand {
            component: component.to_string(),
            capability: "switch".to_string(),
            command: command.to_string(),
            arguments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsRequest {
    pub commands: Vec<DeviceCommand>,
}

/// Response of the capability status endpoint, e.g. `{"switch": {"value": "on"}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchStatus {
    pub switch: AttributeValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeValue {
    #[serde(default)]
    pub value: Option<String>,
}
