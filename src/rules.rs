//! Translate plan triggers into provider rule payloads.
//!
//! Every generated rule is named under the `awaylight/` namespace:
//!
//!   awaylight/<plan>/<group>/trigger[<index>]/on
//!   awaylight/<plan>/<group>/trigger[<index>]/off
//!
//! The name is load-bearing: it is how a later run recognizes which remote
//! rules it owns (there is no side database of rule ids), and it lets a
//! human reading the provider's rule list see exactly what each rule does.

use std::collections::BTreeMap;

use crate::models::plan::{DeviceGroup, InvalidPlanError, Plan, SwitchState, Trigger};
use crate::models::smartthings::{
    CommandAction, DayOfWeek, DeviceCommand, DeviceId, EveryAction, Interval, Rule, RuleAction,
    SpecificTime,
};
use crate::parse;
use crate::resolver::LocationContext;

/// Namespace prefix marking remote rules as owned by this system.
pub const RULE_PREFIX: &str = "awaylight";

/// A plan device resolved against the provider.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub device_id: DeviceId,
    pub component: String,
}

/// Compose one rule: a schedule clause for the given days/time/variation
/// and a switch command to every device id.
pub fn build_rule(
    name: &str,
    devices: &[ResolvedDevice],
    days: &[DayOfWeek],
    trigger_time: &str,
    variation: &str,
    state: SwitchState,
) -> Result<Rule, InvalidPlanError> {
    let variation = parse::parse_variation(variation)?;
    let (reference, offset) = parse::parse_trigger_time(trigger_time, variation)?;

    // One command clause per distinct component, each addressing every
    // device that uses it.
    let mut by_component: BTreeMap<&str, Vec<DeviceId>> = BTreeMap::new();
    for device in devices {
        by_component
            .entry(device.component.as_str())
            .or_default()
            .push(device.device_id.clone());
    }
    let commands = by_component
        .into_iter()
        .map(|(component, device_ids)| {
            RuleAction::Command(CommandAction {
                devices: device_ids,
                commands: vec![DeviceCommand::switch(component, state.as_command())],
            })
        })
        .collect();

    Ok(Rule {
        name: name.to_string(),
        actions: vec![RuleAction::Every(EveryAction {
            specific: SpecificTime {
                reference,
                offset: offset.map(Interval::minutes),
                days_of_week: days.to_vec(),
            },
            actions: commands,
        })],
    })
}

/// Exactly two rules per trigger: `<base>/on` and `<base>/off`. Each rule
/// draws its own variation, so on and off jitter independently.
pub fn build_trigger_rules(
    base_name: &str,
    devices: &[ResolvedDevice],
    trigger: &Trigger,
) -> Result<Vec<Rule>, InvalidPlanError> {
    let days = parse::parse_days(&trigger.days)?;
    let on = build_rule(
        &format!("{}/on", base_name),
        devices,
        &days,
        &trigger.on_time,
        &trigger.variation,
        SwitchState::On,
    )?;
    let off = build_rule(
        &format!("{}/off", base_name),
        devices,
        &days,
        &trigger.off_time,
        &trigger.variation,
        SwitchState::Off,
    )?;
    Ok(vec![on, off])
}

/// Rules for one device group: devices are resolved once, then every
/// trigger is numbered by position and expanded.
pub fn build_group_rules(
    context: &LocationContext,
    plan_name: &str,
    group: &DeviceGroup,
) -> Result<Vec<Rule>, InvalidPlanError> {
    let devices = group
        .devices
        .iter()
        .map(|device| {
            Ok(ResolvedDevice {
                device_id: context.device_id(device)?.clone(),
                component: device.component.clone(),
            })
        })
        .collect::<Result<Vec<_>, InvalidPlanError>>()?;

    let mut rules = Vec::new();
    for (index, trigger) in group.triggers.iter().enumerate() {
        let base_name = format!("{}/{}/{}/trigger[{}]", RULE_PREFIX, plan_name, group.name, index);
        rules.extend(build_trigger_rules(&base_name, &devices, trigger)?);
    }
    Ok(rules)
}

/// The full target rule set for a plan.
pub fn build_plan_rules(
    context: &LocationContext,
    plan: &Plan,
) -> Result<Vec<Rule>, InvalidPlanError> {
    let mut rules = Vec::new();
    for group in &plan.groups {
        rules.extend(build_group_rules(context, &plan.name, group)?);
    }
    Ok(rules)
}
