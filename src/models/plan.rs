//! The vacation lighting plan domain model.
//!
//! A plan describes how to turn various switch devices on and off in a
//! pattern while nobody is home: per device group, a set of triggers keyed
//! by day of week and time of day, with optional random variation so the
//! lights do not fire at exactly the same time every day.
//!
//! Rooms, devices, and components are opaque provider names. They are
//! matched against the provider exactly as written, with no trimming or
//! case folding, so a plan breaks visibly when a device is renamed.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::parse::{self, ParseError};

pub const DEFAULT_COMPONENT: &str = "main";

/// Maximum length of plan and group names.
const NAME_MAX: usize = 50;

/// A plan that fails validation, either structurally or because it refers
/// to rooms/devices the provider does not know.
#[derive(Debug)]
pub enum InvalidPlanError {
    /// A plan or group name that is not a lowercase slug
    Name(String),
    /// An unparseable IANA time zone name
    TimeZone(String),
    /// A (room, device) pair unknown at the provider
    UnknownDevice { room: String, device: String },
    /// A malformed day/time/variation token in a trigger
    Trigger(ParseError),
}

impl Display for InvalidPlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvalidPlanError::Name(name) => write!(f, "invalid name: {:?}", name),
            InvalidPlanError::TimeZone(zone) => write!(f, "invalid time zone: {:?}", zone),
            InvalidPlanError::UnknownDevice { room, device } => {
                write!(f, "device not found at provider: {}/{}", room, device)
            }
            InvalidPlanError::Trigger(e) => write!(f, "invalid trigger: {}", e),
        }
    }
}

impl Error for InvalidPlanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InvalidPlanError::Trigger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for InvalidPlanError {
    fn from(value: ParseError) -> Self {
        InvalidPlanError::Trigger(value)
    }
}

/// States that a switch can be in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_command(&self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl Display for SwitchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_command())
    }
}

/// The provider account; a single PAT token, at most one system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub pat_token: String,
}

/// A trigger, tied to a device group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Day tokens: `all`, `every`, `weekday(s)`, `weekend(s)`, or day names
    pub days: Vec<String>,
    /// Time the devices turn on, in the location's time zone
    pub on_time: String,
    /// Time the devices turn off, in the location's time zone
    pub off_time: String,
    /// Variation applied to the on/off times, or `disabled`/`none`
    pub variation: String,
}

/// A device, tied to a device group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub room: String,
    pub device: String,
    #[serde(default = "default_component")]
    pub component: String,
}

fn default_component() -> String {
    DEFAULT_COMPONENT.to_string()
}

/// A device group: the unit that a test toggle operates on, and the unit
/// that triggers attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    pub devices: Vec<Device>,
    pub triggers: Vec<Trigger>,
}

/// A vacation lighting plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    /// Provider location name where the plan executes
    pub location: String,
    /// Time of day the daily refresh job runs, `HH:MM`
    pub refresh_time: String,
    /// Time zone the daily refresh job runs in
    #[serde(default = "default_refresh_zone")]
    pub refresh_zone: String,
    #[serde(default)]
    pub groups: Vec<DeviceGroup>,
}

fn default_refresh_zone() -> String {
    "UTC".to_string()
}

impl Plan {
    /// Structural validation: names, refresh schedule, and trigger tokens.
    /// Device existence at the provider is checked separately, against a
    /// live location context.
    pub fn validate(&self) -> Result<(), InvalidPlanError> {
        validate_name(&self.name)?;
        parse::parse_time(&self.refresh_time).map_err(InvalidPlanError::Trigger)?;
        if self.refresh_zone.parse::<chrono_tz::Tz>().is_err() {
            return Err(InvalidPlanError::TimeZone(self.refresh_zone.clone()));
        }
        for group in &self.groups {
            validate_name(&group.name)?;
            for trigger in &group.triggers {
                parse::parse_days(&trigger.days)?;
                parse::parse_variation_spec(&trigger.variation)?;
                parse::parse_trigger_time(&trigger.on_time, None)?;
                parse::parse_trigger_time(&trigger.off_time, None)?;
            }
        }
        Ok(())
    }

    /// All devices in the plan, optionally filtered by group name.
    pub fn devices(&self, group_name: Option<&str>) -> Vec<&Device> {
        self.groups
            .iter()
            .filter(|g| group_name.is_none_or(|name| g.name == name))
            .flat_map(|g| g.devices.iter())
            .collect()
    }
}

/// Plan and group names are lowercase slugs, 1-50 characters of `[a-z0-9-]`.
fn validate_name(name: &str) -> Result<(), InvalidPlanError> {
    let valid = !name.is_empty()
        && name.len() <= NAME_MAX
        && name.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'));
    if valid {
        Ok(())
    } else {
        Err(InvalidPlanError::Name(name.to_string()))
    }
}
