//! High-level engine operations: refresh scheduling, plan reconciliation,
//! plan validation, and direct device control.
//!
//! `refresh_plan` is the reconciliation routine the scheduler invokes. It
//! recomputes the full target rule set from stored plan state and replaces
//! whatever this system currently owns at the provider, so it is
//! idempotent and self-healing: running it twice changes nothing, and a
//! remote rule someone deleted by hand comes back on the next run.

use core::fmt;
use diesel::PgConnection;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::thread;
use std::time::Duration;

use crate::client::{SmartThingsApi, SmartThingsClientError};
use crate::config::Config;
use crate::db::store::{PlanStore, StoreError};
use crate::models::plan::{Device, InvalidPlanError, Plan, SwitchState};
use crate::models::smartthings::{CommandsRequest, DeviceCommand, Rule, RuleSummary};
use crate::parse::{self, ParseError};
use crate::resolver::LocationContext;
use crate::rules;
use crate::scheduler::{self, ScheduleError};

#[derive(Debug)]
pub enum ManagerError {
    Plan(InvalidPlanError),
    Client(SmartThingsClientError),
    Store(StoreError),
    Schedule(ScheduleError),
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Plan(e) => write!(f, "invalid plan: {}", e),
            ManagerError::Client(e) => write!(f, "provider error: {}", e),
            ManagerError::Store(e) => write!(f, "store error: {}", e),
            ManagerError::Schedule(e) => write!(f, "schedule error: {}", e),
        }
    }
}

impl Error for ManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ManagerError::Plan(e) => Some(e),
            ManagerError::Client(e) => Some(e),
            ManagerError::Store(e) => Some(e),
            ManagerError::Schedule(e) => Some(e),
        }
    }
}

impl From<InvalidPlanError> for ManagerError {
    fn from(value: InvalidPlanError) -> Self {
        ManagerError::Plan(value)
    }
}

impl From<ParseError> for ManagerError {
    fn from(value: ParseError) -> Self {
        ManagerError::Plan(InvalidPlanError::Trigger(value))
    }
}

impl From<SmartThingsClientError> for ManagerError {
    fn from(value: SmartThingsClientError) -> Self {
        ManagerError::Client(value)
    }
}

impl From<StoreError> for ManagerError {
    fn from(value: StoreError) -> Self {
        ManagerError::Store(value)
    }
}

impl From<ScheduleError> for ManagerError {
    fn from(value: ScheduleError) -> Self {
        ManagerError::Schedule(value)
    }
}

/// Create or replace the job that refreshes a plan's rules every day.
pub fn schedule_daily_refresh(
    conn: &mut PgConnection,
    config: &Config,
    plan_name: &str,
    location: &str,
    refresh_time: &str,
    time_zone: &str,
) -> Result<(), ManagerError> {
    let job_id = format!("daily/{}", plan_name);
    let (hour, minute) = parse::parse_time(refresh_time)?;
    scheduler::schedule_daily_job(
        conn,
        &job_id,
        plan_name,
        location,
        hour,
        minute,
        0,
        time_zone,
        config.daily_job_jitter_sec,
        config.daily_job_misfire_grace_sec,
    )?;
    Ok(())
}

/// Remove any existing daily refresh job for a plan.
pub fn unschedule_daily_refresh(
    conn: &mut PgConnection,
    plan_name: &str,
) -> Result<(), ManagerError> {
    let job_id = format!("daily/{}", plan_name);
    scheduler::unschedule_job(conn, &job_id)?;
    Ok(())
}

/// Queue a one-shot refresh of a plan, to run as soon as the worker is free.
pub fn schedule_immediate_refresh(
    conn: &mut PgConnection,
    config: &Config,
    plan_name: &str,
    location: &str,
) -> Result<(), ManagerError> {
    let job_id = format!(
        "immediate/{}/{}",
        plan_name,
        chrono::Utc::now().to_rfc3339()
    );
    scheduler::schedule_immediate_job(
        conn,
        &job_id,
        plan_name,
        location,
        config.daily_job_misfire_grace_sec,
    )?;
    Ok(())
}

/// Refresh the plan's rules at the provider, replacing or removing them.
///
/// This is the target of the refresh jobs; nothing else should call it.
/// Both the plan name and the location are captured when the job is
/// scheduled, so the rules can still be cleared from the old location even
/// if the plan has been deleted or moved by the time the job runs.
///
/// A refresh must always look successful to the scheduler: nobody is
/// waiting on the result, so any failure is logged and swallowed here.
pub fn refresh_plan<S, P, C>(store: &mut S, connect: C, plan_name: &str, location: &str)
where
    S: PlanStore,
    P: SmartThingsApi,
    C: FnOnce(&str) -> P,
{
    info!("Refreshing plan {} at location {}", plan_name, location);
    match try_refresh(store, connect, plan_name, location) {
        Ok(()) => info!("Completed refreshing plan {} at location {}", plan_name, location),
        Err(e) => error!("Refresh of plan {} failed: {}", plan_name, e),
    }
}

fn try_refresh<S, P, C>(
    store: &mut S,
    connect: C,
    plan_name: &str,
    location: &str,
) -> Result<(), ManagerError>
where
    S: PlanStore,
    P: SmartThingsApi,
    C: FnOnce(&str) -> P,
{
    let Some(account) = store.retrieve_account()? else {
        // Nothing can be authenticated, so no provider call is possible.
        error!("Account not found; refresh cannot proceed");
        return Ok(());
    };

    let plan = match store.retrieve_plan_enabled(plan_name)? {
        None => {
            error!("Plan not found; treating this as a disabled plan");
            None
        }
        Some(false) => None,
        Some(true) => match store.retrieve_plan(plan_name)? {
            None => None,
            Some(plan) if plan.location != location => {
                error!("Plan location does not match job location; treating this as a disabled plan");
                None
            }
            Some(plan) => Some(plan),
        },
    };

    let provider = connect(&account.pat_token);
    let mut context = LocationContext::open(&provider, location)?;
    let target = match &plan {
        Some(plan) => rules::build_plan_rules(&context, plan)?,
        None => Vec::new(),
    };
    replace_rules(&provider, &mut context, plan_name, &target)?;
    Ok(())
}

/// Converge the provider's rule set for one plan: delete everything this
/// plan currently owns, create the target set, then update the context's
/// managed-rule cache to exactly the new set.
fn replace_rules<P: SmartThingsApi>(
    provider: &P,
    context: &mut LocationContext,
    plan_name: &str,
    target: &[Rule],
) -> Result<(), ManagerError> {
    let existing = context.managed_rule_ids(plan_name);
    for rule_id in &existing {
        provider.delete_rule(context.location_id(), rule_id)?;
    }

    let mut created: Vec<RuleSummary> = Vec::with_capacity(target.len());
    for rule in target {
        created.push(provider.create_rule(context.location_id(), rule)?);
    }

    info!(
        "Plan {}: deleted {} rule(s), created {} rule(s)",
        plan_name,
        existing.len(),
        created.len()
    );
    context.replace_managed_rules(plan_name, &created);
    Ok(())
}

/// Validate a plan against the live provider before it is persisted:
/// structural checks first, then device resolution and rule building, so a
/// plan naming a renamed or deleted device is rejected up front.
pub fn validate_plan<P: SmartThingsApi>(provider: &P, plan: &Plan) -> Result<(), ManagerError> {
    plan.validate()?;
    let context = LocationContext::open(provider, &plan.location)?;
    rules::build_plan_rules(&context, plan)?;
    Ok(())
}

/// Set a group of devices to a state, for manual verification.
pub fn set_device_state<P: SmartThingsApi>(
    provider: &P,
    location: &str,
    devices: &[Device],
    state: SwitchState,
) -> Result<(), ManagerError> {
    let context = LocationContext::open(provider, location)?;
    set_switches(provider, &context, devices, state)
}

/// Toggle a group of devices on and off a number of times.
///
/// This is sensitive to timing: flipping state too quickly can be dropped
/// even by local Zigbee devices, so keep the delay at a few seconds.
pub fn toggle_devices<P: SmartThingsApi>(
    provider: &P,
    location: &str,
    devices: &[Device],
    toggles: u32,
    delay: Duration,
) -> Result<(), ManagerError> {
    let context = LocationContext::open(provider, location)?;
    for toggle in 0..toggles {
        if toggle > 0 {
            thread::sleep(delay);
        }
        set_switches(provider, &context, devices, SwitchState::On)?;
        thread::sleep(delay);
        set_switches(provider, &context, devices, SwitchState::Off)?;
    }
    Ok(())
}

/// Read back the current switch state of each device.
pub fn check_device_states<P: SmartThingsApi>(
    provider: &P,
    location: &str,
    devices: &[Device],
) -> Result<Vec<(Device, SwitchState)>, ManagerError> {
    let context = LocationContext::open(provider, location)?;
    let mut states = Vec::with_capacity(devices.len());
    for device in devices {
        let device_id = context.device_id(device)?;
        let state = provider.switch_status(device_id, &device.component)?;
        states.push((device.clone(), state));
    }
    Ok(states)
}

fn set_switches<P: SmartThingsApi>(
    provider: &P,
    context: &LocationContext,
    devices: &[Device],
    state: SwitchState,
) -> Result<(), ManagerError> {
    for device in devices {
        let device_id = context.device_id(device)?;
        let request = CommandsRequest {
            commands: vec![DeviceCommand::switch(&device.component, state.as_command())],
        };
        provider.execute_commands(device_id, &request)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::{Account, DeviceGroup, Trigger};
    use crate::models::smartthings::{
        DeviceId, DeviceSummary, LocationId, LocationSummary, RoomId, RoomSummary, RuleId,
    };
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use std::rc::Rc;

    // ---- in-memory provider ----

    #[derive(Default)]
    struct ProviderState {
        rules: BTreeMap<String, String>, // rule id -> rule name
        next_rule_id: u32,
        commands: Vec<(String, String, String)>, // device id, component, command
        calls: u32,
    }

    #[derive(Clone)]
    struct FakeProvider {
        state: Rc<RefCell<ProviderState>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            FakeProvider {
                state: Rc::new(RefCell::new(ProviderState::default())),
            }
        }

        fn seed_rule(&self, name: &str) {
            let mut state = self.state.borrow_mut();
            let id = format!("seeded-{}", state.rules.len());
            state.rules.insert(id, name.to_string());
        }

        fn rule_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.state.borrow().rules.values().cloned().collect();
            names.sort();
            names
        }

        fn calls(&self) -> u32 {
            self.state.borrow().calls
        }
    }

    impl SmartThingsApi for FakeProvider {
        fn locations(&self) -> Result<Vec<LocationSummary>, SmartThingsClientError> {
            self.state.borrow_mut().calls += 1;
            Ok(vec![LocationSummary {
                location_id: LocationId("loc-1".to_string()),
                name: "Beach House".to_string(),
            }])
        }

        fn rooms(&self, _: &LocationId) -> Result<Vec<RoomSummary>, SmartThingsClientError> {
            self.state.borrow_mut().calls += 1;
            Ok(vec![RoomSummary {
                room_id: RoomId("room-1".to_string()),
                name: "Living Room".to_string(),
            }])
        }

        fn switch_devices(&self, _: &LocationId) -> Result<Vec<DeviceSummary>, SmartThingsClientError> {
            self.state.borrow_mut().calls += 1;
            Ok(vec![
                DeviceSummary {
                    device_id: DeviceId("dev-1".to_string()),
                    name: "Sofa Lamp".to_string(),
                    label: None,
                    room_id: Some(RoomId("room-1".to_string())),
                },
                DeviceSummary {
                    device_id: DeviceId("dev-2".to_string()),
                    name: "Window Lamp".to_string(),
                    label: None,
                    room_id: Some(RoomId("room-1".to_string())),
                },
            ])
        }

        fn rules(&self, _: &LocationId) -> Result<Vec<RuleSummary>, SmartThingsClientError> {
            let mut state = self.state.borrow_mut();
            state.calls += 1;
            Ok(state
                .rules
                .iter()
                .map(|(id, name)| RuleSummary {
                    id: RuleId(id.clone()),
                    name: name.clone(),
                })
                .collect())
        }

        fn create_rule(&self, _: &LocationId, rule: &Rule) -> Result<RuleSummary, SmartThingsClientError> {
            let mut state = self.state.borrow_mut();
            state.calls += 1;
            state.next_rule_id += 1;
            let id = format!("rule-{}", state.next_rule_id);
            state.rules.insert(id.clone(), rule.name.clone());
            Ok(RuleSummary {
                id: RuleId(id),
                name: rule.name.clone(),
            })
        }

        fn delete_rule(&self, _: &LocationId, rule_id: &RuleId) -> Result<(), SmartThingsClientError> {
            let mut state = self.state.borrow_mut();
            state.calls += 1;
            state.rules.remove(&rule_id.0);
            Ok(())
        }

        fn execute_commands(
            &self,
            device_id: &DeviceId,
            request: &CommandsRequest,
        ) -> Result<(), SmartThingsClientError> {
            let mut state = self.state.borrow_mut();
            state.calls += 1;
            for command in &request.commands {
                state.commands.push((
                    device_id.0.clone(),
                    command.component.clone(),
                    command.command.clone(),
                ));
            }
            Ok(())
        }

        fn switch_status(&self, _: &DeviceId, _: &str) -> Result<SwitchState, SmartThingsClientError> {
            self.state.borrow_mut().calls += 1;
            Ok(SwitchState::On)
        }
    }

    // ---- in-memory store ----

    #[derive(Default)]
    struct FakeStore {
        account: Option<Account>,
        plans: BTreeMap<String, (bool, Plan)>,
    }

    impl PlanStore for FakeStore {
        fn retrieve_account(&mut self) -> Result<Option<Account>, StoreError> {
            Ok(self.account.clone())
        }

        fn retrieve_plan(&mut self, plan_name: &str) -> Result<Option<Plan>, StoreError> {
            Ok(self.plans.get(plan_name).map(|(_, plan)| plan.clone()))
        }

        fn retrieve_plan_enabled(&mut self, plan_name: &str) -> Result<Option<bool>, StoreError> {
            Ok(self.plans.get(plan_name).map(|(enabled, _)| *enabled))
        }
    }

    fn sample_plan() -> Plan {
        Plan {
            name: "beach-house".to_string(),
            location: "Beach House".to_string(),
            refresh_time: "00:30".to_string(),
            refresh_zone: "UTC".to_string(),
            groups: vec![DeviceGroup {
                name: "first-floor".to_string(),
                devices: vec![
                    Device {
                        room: "Living Room".to_string(),
                        device: "Sofa Lamp".to_string(),
                        component: "main".to_string(),
                    },
                    Device {
                        room: "Living Room".to_string(),
                        device: "Window Lamp".to_string(),
                        component: "main".to_string(),
                    },
                ],
                triggers: vec![Trigger {
                    days: vec!["weekdays".to_string()],
                    on_time: "19:30".to_string(),
                    off_time: "22:45".to_string(),
                    variation: "+/- 30 minutes".to_string(),
                }],
            }],
        }
    }

    fn store_with(plan: Plan, enabled: bool) -> FakeStore {
        let mut store = FakeStore {
            account: Some(Account {
                pat_token: "token".to_string(),
            }),
            ..FakeStore::default()
        };
        store.plans.insert(plan.name.clone(), (enabled, plan));
        store
    }

    fn expected_rule_names() -> Vec<String> {
        vec![
            "awaylight/beach-house/first-floor/trigger[0]/off".to_string(),
            "awaylight/beach-house/first-floor/trigger[0]/on".to_string(),
        ]
    }

    #[test]
    fn refresh_creates_the_target_rule_set() {
        let provider = FakeProvider::new();
        let mut store = store_with(sample_plan(), true);
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        assert_eq!(provider.rule_names(), expected_rule_names());
    }

    #[test]
    fn refresh_is_idempotent() {
        let provider = FakeProvider::new();
        let mut store = store_with(sample_plan(), true);
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        // Same names, no duplicates
        assert_eq!(provider.rule_names(), expected_rule_names());
    }

    #[test]
    fn refresh_without_account_makes_no_provider_calls() {
        let provider = FakeProvider::new();
        let connected = Cell::new(false);
        let mut store = FakeStore::default();
        store.plans.insert("beach-house".to_string(), (true, sample_plan()));

        refresh_plan(
            &mut store,
            |_| {
                connected.set(true);
                provider.clone()
            },
            "beach-house",
            "Beach House",
        );
        assert!(!connected.get());
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn refresh_of_a_deleted_plan_clears_its_rules() {
        let provider = FakeProvider::new();
        provider.seed_rule("awaylight/beach-house/first-floor/trigger[0]/on");
        provider.seed_rule("awaylight/beach-house/first-floor/trigger[0]/off");
        provider.seed_rule("awaylight/lake-cabin/dock/trigger[0]/on");
        provider.seed_rule("Goodnight routine");

        let mut store = FakeStore {
            account: Some(Account {
                pat_token: "token".to_string(),
            }),
            ..FakeStore::default()
        };
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");

        // Only this plan's managed rules are gone
        assert_eq!(
            provider.rule_names(),
            vec![
                "Goodnight routine".to_string(),
                "awaylight/lake-cabin/dock/trigger[0]/on".to_string(),
            ]
        );
    }

    #[test]
    fn refresh_of_a_moved_plan_clears_the_old_location() {
        let provider = FakeProvider::new();
        provider.seed_rule("awaylight/beach-house/first-floor/trigger[0]/on");

        let mut plan = sample_plan();
        plan.location = "Lake Cabin".to_string();
        let mut store = store_with(plan, true);

        // The job still carries the old location; the mismatch empties the
        // target set instead of erroring.
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        assert!(provider.rule_names().is_empty());
    }

    #[test]
    fn disabling_then_reenabling_converges_both_ways() {
        let provider = FakeProvider::new();
        let mut store = store_with(sample_plan(), true);
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        assert_eq!(provider.rule_names(), expected_rule_names());

        store.plans.get_mut("beach-house").unwrap().0 = false;
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        assert!(provider.rule_names().is_empty());

        store.plans.get_mut("beach-house").unwrap().0 = true;
        refresh_plan(&mut store, |_| provider.clone(), "beach-house", "Beach House");
        assert_eq!(provider.rule_names(), expected_rule_names());
    }

    #[test]
    fn validate_plan_rejects_unknown_devices() {
        let provider = FakeProvider::new();
        let mut plan = sample_plan();
        plan.groups[0].devices[0].device = "Renamed Lamp".to_string();
        match validate_plan(&provider, &plan) {
            Err(ManagerError::Plan(InvalidPlanError::UnknownDevice { device, .. })) => {
                assert_eq!(device, "Renamed Lamp");
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn validate_plan_accepts_a_resolvable_plan() {
        let provider = FakeProvider::new();
        validate_plan(&provider, &sample_plan()).expect("plan validates");
    }

    #[test]
    fn toggle_sequences_on_then_off_per_cycle() {
        let provider = FakeProvider::new();
        let devices = sample_plan().groups[0].devices.clone();
        toggle_devices(&provider, "Beach House", &devices, 2, Duration::ZERO).unwrap();

        let state = provider.state.borrow();
        let commands: Vec<&str> = state.commands.iter().map(|(_, _, c)| c.as_str()).collect();
        assert_eq!(commands, vec!["on", "on", "off", "off", "on", "on", "off", "off"]);
    }

    #[test]
    fn set_device_state_commands_each_device() {
        let provider = FakeProvider::new();
        let devices = sample_plan().groups[0].devices.clone();
        set_device_state(&provider, "Beach House", &devices, SwitchState::Off).unwrap();

        let state = provider.state.borrow();
        assert_eq!(
            state.commands,
            vec![
                ("dev-1".to_string(), "main".to_string(), "off".to_string()),
                ("dev-2".to_string(), "main".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn check_device_states_reads_back_switch_status() {
        let provider = FakeProvider::new();
        let devices = sample_plan().groups[0].devices.clone();
        let states = check_device_states(&provider, "Beach House", &devices).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(_, state)| *state == SwitchState::On));
    }

    #[test]
    fn toggling_at_an_unknown_location_fails() {
        let provider = FakeProvider::new();
        let result = set_device_state(&provider, "Mountain House", &[], SwitchState::On);
        assert!(matches!(
            result,
            Err(ManagerError::Client(SmartThingsClientError::LocationNotFound(_)))
        ));
    }
}
