//! HTTP client for the SmartThings API (subset used by the engine).
//!
//! - Blocking client using `ureq` (no async).
//! - Uses the models in `crate::models::smartthings`.
//! - Authenticates with a per-account PAT token supplied at construction;
//!   the engine builds a fresh client for each refresh run.
//!
//! All list endpoints are paginated server-side. The engine asks for the
//! largest page and does not walk further pages; home-scale installations
//! do not come close to the limits.
//!
//! Transient failures (transport errors, 429, 5xx) are retried with
//! exponential backoff between a configured minimum and maximum delay,
//! up to a bounded attempt count.

use http::StatusCode;
use serde::de::DeserializeOwned;
use std::thread;

use crate::config::{Config, RetryPolicy};
use crate::models::plan::SwitchState;
use crate::models::smartthings::*;

const LOCATION_LIMIT: &str = "100";
const ROOM_LIMIT: &str = "250";
const DEVICE_LIMIT: &str = "1000";
const RULE_LIMIT: &str = "100";

#[derive(Debug)]
pub enum SmartThingsClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
    LocationNotFound(String),
}

impl core::fmt::Display for SmartThingsClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SmartThingsClientError::Transport(s) => write!(f, "transport error: {}", s),
            SmartThingsClientError::Http { status, message } => {
                write!(f, "http {}: {}", status, message)
            }
            SmartThingsClientError::Json(e) => write!(f, "json error: {}", e),
            SmartThingsClientError::LocationNotFound(name) => {
                write!(f, "location not found: {}", name)
            }
        }
    }
}

impl std::error::Error for SmartThingsClientError {}

/// The provider operations the engine depends on. `SmartThingsClient` is
/// the real implementation; tests substitute an in-memory one.
pub trait SmartThingsApi {
    fn locations(&self) -> Result<Vec<LocationSummary>, SmartThingsClientError>;
    fn rooms(&self, location_id: &LocationId) -> Result<Vec<RoomSummary>, SmartThingsClientError>;
    fn switch_devices(
        &self,
        location_id: &LocationId,
    ) -> Result<Vec<DeviceSummary>, SmartThingsClientError>;
    fn rules(&self, location_id: &LocationId) -> Result<Vec<RuleSummary>, SmartThingsClientError>;
    fn create_rule(
        &self,
        location_id: &LocationId,
        rule: &Rule,
    ) -> Result<RuleSummary, SmartThingsClientError>;
    fn delete_rule(
        &self,
        location_id: &LocationId,
        rule_id: &RuleId,
    ) -> Result<(), SmartThingsClientError>;
    fn execute_commands(
        &self,
        device_id: &DeviceId,
        request: &CommandsRequest,
    ) -> Result<(), SmartThingsClientError>;
    fn switch_status(
        &self,
        device_id: &DeviceId,
        component: &str,
    ) -> Result<SwitchState, SmartThingsClientError>;
}

pub struct SmartThingsClient {
    agent: ureq::Agent,
    base_url: String,
    pat_token: String,
    retry: RetryPolicy,
}

impl SmartThingsClient {
    pub fn new(config: &Config, pat_token: &str) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.request_timeout))
            .http_status_as_error(false)
            .build();
        SmartThingsClient {
            agent: agent_config.into(),
            base_url: config.smartthings_base_url.trim_end_matches('/').to_string(),
            pat_token: pat_token.to_string(),
            retry: config.retry.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.pat_token)
    }

    /// Run an operation with bounded retries and exponential backoff.
    fn with_retry<T>(
        &self,
        description: &str,
        operation: impl Fn() -> Result<T, SmartThingsClientError>,
    ) -> Result<T, SmartThingsClientError> {
        let max_attempts = self.retry.max_attempts.get();
        let mut delay = self.retry.min_delay;
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        description,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    thread::sleep(delay);
                    delay = (delay * 2).min(self.retry.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_response<T: DeserializeOwned>(
        response: Result<http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<T, SmartThingsClientError> {
        let body = Self::read_body(response)?;
        decode_json(&body)
    }

    /// Check status and drain the body, for endpoints whose payload the
    /// engine does not use.
    fn read_body(
        response: Result<http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<String, SmartThingsClientError> {
        let mut response = response.map_err(|e| SmartThingsClientError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| SmartThingsClientError::Transport(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(SmartThingsClientError::Http {
                status: status.as_u16(),
                message: body,
            })
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SmartThingsClientError> {
        let mut request = self
            .agent
            .get(self.url(path))
            .header("Accept", "application/vnd.smartthings+json;v=1")
            .header("Accept-Language", "en_US")
            .header("Authorization", self.bearer());
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        Self::read_response(request.call())
    }

    fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, SmartThingsClientError> {
        let mut request = self
            .agent
            .post(self.url(path))
            .header("Accept", "application/vnd.smartthings+json;v=1")
            .header("Accept-Language", "en_US")
            .header("Authorization", self.bearer());
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        Self::read_response(request.send_json(body))
    }

    fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<(), SmartThingsClientError> {
        let mut request = self
            .agent
            .delete(self.url(path))
            .header("Accept", "application/vnd.smartthings+json;v=1")
            .header("Accept-Language", "en_US")
            .header("Authorization", self.bearer());
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        Self::read_body(request.call()).map(|_| ())
    }
}

impl SmartThingsApi for SmartThingsClient {
    fn locations(&self) -> Result<Vec<LocationSummary>, SmartThingsClientError> {
        self.with_retry("list locations", || {
            let list: ItemList<LocationSummary> =
                self.get_json("/locations", &[("limit", LOCATION_LIMIT)])?;
            Ok(list.items)
        })
    }

    fn rooms(&self, location_id: &LocationId) -> Result<Vec<RoomSummary>, SmartThingsClientError> {
        self.with_retry("list rooms", || {
            let list: ItemList<RoomSummary> = self.get_json(
                &format!("/locations/{}/rooms", location_id.0),
                &[("limit", ROOM_LIMIT)],
            )?;
            Ok(list.items)
        })
    }

    fn switch_devices(
        &self,
        location_id: &LocationId,
    ) -> Result<Vec<DeviceSummary>, SmartThingsClientError> {
        self.with_retry("list devices", || {
            let list: ItemList<DeviceSummary> = self.get_json(
                "/devices",
                &[
                    ("locationId", location_id.0.as_str()),
                    ("capability", "switch"),
                    ("limit", DEVICE_LIMIT),
                ],
            )?;
            Ok(list.items)
        })
    }

    fn rules(&self, location_id: &LocationId) -> Result<Vec<RuleSummary>, SmartThingsClientError> {
        self.with_retry("list rules", || {
            let list: ItemList<RuleSummary> = self.get_json(
                "/rules",
                &[("locationId", location_id.0.as_str()), ("limit", RULE_LIMIT)],
            )?;
            Ok(list.items)
        })
    }

    fn create_rule(
        &self,
        location_id: &LocationId,
        rule: &Rule,
    ) -> Result<RuleSummary, SmartThingsClientError> {
        self.with_retry("create rule", || {
            self.post_json("/rules", &[("locationId", location_id.0.as_str())], rule)
        })
    }

    fn delete_rule(
        &self,
        location_id: &LocationId,
        rule_id: &RuleId,
    ) -> Result<(), SmartThingsClientError> {
        self.with_retry("delete rule", || {
            self.delete(
                &format!("/rules/{}", rule_id.0),
                &[("locationId", location_id.0.as_str())],
            )
        })
    }

    fn execute_commands(
        &self,
        device_id: &DeviceId,
        request: &CommandsRequest,
    ) -> Result<(), SmartThingsClientError> {
        self.with_retry("execute device commands", || {
            let _: serde_json::Value =
                self.post_json(&format!("/devices/{}/commands", device_id.0), &[], request)?;
            Ok(())
        })
    }

    fn switch_status(
        &self,
        device_id: &DeviceId,
        component: &str,
    ) -> Result<SwitchState, SmartThingsClientError> {
        self.with_retry("read switch status", || {
            let status: SwitchStatus = self.get_json(
                &format!(
                    "/devices/{}/components/{}/capabilities/switch/status",
                    device_id.0, component
                ),
                &[],
            )?;
            match status.switch.value.as_deref() {
                Some("on") => Ok(SwitchState::On),
                _ => Ok(SwitchState::Off),
            }
        })
    }
}

fn is_transient(error: &SmartThingsClientError) -> bool {
    match error {
        SmartThingsClientError::Transport(_) => true,
        SmartThingsClientError::Http { status, .. } => {
            match StatusCode::from_u16(*status) {
                Ok(status) => status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
                Err(_) => false,
            }
        }
        _ => false,
    }
}

/// Decode JSON reporting the path of the failing field, not just the line.
fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, SmartThingsClientError> {
    let mut deserializer = serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|e| SmartThingsClientError::Json(e.to_string()))
}
