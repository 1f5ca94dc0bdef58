//! Per-run location context: name↔id resolution and the managed-rule index.
//!
//! Plans are written in terms of human-readable location, room, and device
//! names, but the provider API works almost entirely in opaque ids and has
//! no lookup-by-name. Rather than spreading that burden over individual
//! calls, one context is built up front from four list requests and then
//! consulted locally. A context lives for exactly one refresh or device
//! control run and is never shared; every run starts from fresh provider
//! state.

use log::{debug, info};
use std::collections::BTreeMap;

use crate::client::{SmartThingsApi, SmartThingsClientError};
use crate::models::plan::{Device, InvalidPlanError, DEFAULT_COMPONENT};
use crate::models::smartthings::{
    DeviceId, DeviceSummary, LocationId, RoomId, RoomSummary, RuleId, RuleSummary,
};
use crate::rules;

pub struct LocationContext {
    location: String,
    location_id: LocationId,
    room_by_id: BTreeMap<RoomId, String>,
    room_by_name: BTreeMap<String, RoomId>,
    device_by_id: BTreeMap<DeviceId, Device>,
    device_by_name: BTreeMap<String, DeviceId>,
    /// Remote rules carrying this system's namespace prefix, id → name.
    managed_rules: BTreeMap<RuleId, String>,
}

impl LocationContext {
    /// Build a context for a location by name. Fails when the location is
    /// not visible to the token.
    pub fn open<P: SmartThingsApi>(
        provider: &P,
        location: &str,
    ) -> Result<Self, SmartThingsClientError> {
        let location_id = provider
            .locations()?
            .into_iter()
            .find(|l| l.name == location)
            .map(|l| l.location_id)
            .ok_or_else(|| SmartThingsClientError::LocationNotFound(location.to_string()))?;
        info!("Location id: {}", location_id.0);

        let rooms = provider.rooms(&location_id)?;
        let devices = provider.switch_devices(&location_id)?;
        let rules = provider.rules(&location_id)?;
        Ok(Self::from_parts(location, location_id, rooms, devices, rules))
    }

    pub(crate) fn from_parts(
        location: &str,
        location_id: LocationId,
        rooms: Vec<RoomSummary>,
        devices: Vec<DeviceSummary>,
        rules: Vec<RuleSummary>,
    ) -> Self {
        let mut room_by_id = BTreeMap::new();
        let mut room_by_name = BTreeMap::new();
        for room in rooms {
            room_by_id.insert(room.room_id.clone(), room.name.clone());
            room_by_name.insert(room.name, room.room_id);
        }

        let mut device_by_id = BTreeMap::new();
        let mut device_by_name = BTreeMap::new();
        for summary in devices {
            let Some(room_name) = summary.room_id.as_ref().and_then(|id| room_by_id.get(id)) else {
                continue; // devices not assigned to a room cannot be addressed by a plan
            };
            // Users see the label, if there is one
            let device_name = match summary.label {
                Some(label) if !label.is_empty() => label,
                _ => summary.name,
            };
            let device = Device {
                room: room_name.clone(),
                device: device_name,
                component: DEFAULT_COMPONENT.to_string(),
            };
            device_by_name.insert(device_key(&device.room, &device.device), summary.device_id.clone());
            device_by_id.insert(summary.device_id, device);
        }

        let namespace = format!("{}/", rules::RULE_PREFIX);
        let managed_rules = rules
            .into_iter()
            .filter(|r| r.name.starts_with(&namespace))
            .map(|r| (r.id, r.name))
            .collect::<BTreeMap<_, _>>();

        info!(
            "Location [{}] has {} rooms, {} devices, {} managed rules",
            location,
            room_by_id.len(),
            device_by_id.len(),
            managed_rules.len()
        );
        debug!("Devices by name: {:?}", device_by_name.keys().collect::<Vec<_>>());

        LocationContext {
            location: location.to_string(),
            location_id,
            room_by_id,
            room_by_name,
            device_by_id,
            device_by_name,
            managed_rules,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn location_id(&self) -> &LocationId {
        &self.location_id
    }

    pub fn room_id(&self, room: &str) -> Option<&RoomId> {
        self.room_by_name.get(room)
    }

    pub fn room_name(&self, room_id: &RoomId) -> Option<&str> {
        self.room_by_id.get(room_id).map(String::as_str)
    }

    /// Resolve a plan device to its provider id. A miss means the plan
    /// refers to a device that was renamed, moved, or deleted.
    pub fn device_id(&self, device: &Device) -> Result<&DeviceId, InvalidPlanError> {
        self.device_by_name
            .get(&device_key(&device.room, &device.device))
            .ok_or_else(|| InvalidPlanError::UnknownDevice {
                room: device.room.clone(),
                device: device.device.clone(),
            })
    }

    pub fn device(&self, device_id: &DeviceId) -> Option<&Device> {
        self.device_by_id.get(device_id)
    }

    /// Ids of the managed rules belonging to one plan.
    pub fn managed_rule_ids(&self, plan_name: &str) -> Vec<RuleId> {
        let prefix = plan_prefix(plan_name);
        self.managed_rules
            .iter()
            .filter(|(_, name)| name.starts_with(&prefix))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Replace this plan's entries in the managed-rule cache with a new
    /// set. Purely a cache update; the remote calls happen elsewhere.
    pub fn replace_managed_rules(&mut self, plan_name: &str, new_rules: &[RuleSummary]) {
        let prefix = plan_prefix(plan_name);
        self.managed_rules.retain(|_, name| !name.starts_with(&prefix));
        for rule in new_rules {
            self.managed_rules.insert(rule.id.clone(), rule.name.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn managed_rule_names(&self) -> Vec<&str> {
        self.managed_rules.values().map(String::as_str).collect()
    }
}

/// Lookup key for a device: names are matched exactly as the provider
/// reports them, whitespace included.
fn device_key(room: &str, device: &str) -> String {
    format!("{}/{}", room, device)
}

fn plan_prefix(plan_name: &str) -> String {
    format!("{}/{}/", rules::RULE_PREFIX, plan_name)
}
