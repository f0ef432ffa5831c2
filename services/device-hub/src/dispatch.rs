use tracing::{debug, warn};

use crate::error::{HubError, SendError};
use crate::models::{DeviceState, OutboundMessage};
use crate::registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchTarget {
    /// The connection whose frame produced the state.
    Origin,
    /// Whatever connection is currently registered for this device id.
    Device(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub rule: &'static str,
    pub target: DispatchTarget,
    pub message: OutboundMessage,
}

pub trait DispatchRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, state: &DeviceState) -> Option<Dispatch>;
}

/// Echoes `new_wallpaper` back to the reporting device.
pub struct WallpaperRule;

impl DispatchRule for WallpaperRule {
    fn name(&self) -> &'static str {
        "wallpaper_update"
    }

    fn evaluate(&self, state: &DeviceState) -> Option<Dispatch> {
        let url = state.data.get_str("new_wallpaper")?;
        Some(Dispatch {
            rule: self.name(),
            target: DispatchTarget::Origin,
            message: OutboundMessage::wallpaper_update(url),
        })
    }
}

pub struct DispatchOutcome {
    pub rule: &'static str,
    pub result: Result<(), HubError>,
}

/// Rules run in registration order and every match is sent.
pub struct DispatchEngine {
    rules: Vec<Box<dyn DispatchRule>>,
}

impl Default for DispatchEngine {
    fn default() -> Self {
        Self::new().with_rule(WallpaperRule)
    }
}

impl DispatchEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl DispatchRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn evaluate(&self, state: &DeviceState) -> Vec<Dispatch> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(state))
            .collect()
    }

    /// Evaluate `state` and attempt every resulting send. Failures are logged and
    /// returned, never raised.
    pub async fn dispatch(
        &self,
        origin: &ConnectionHandle,
        registry: &ConnectionRegistry,
        state: &DeviceState,
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        for dispatch in self.evaluate(state) {
            let (device_id, sent): (String, Result<(), SendError>) = match &dispatch.target {
                DispatchTarget::Origin => (
                    origin.device_id().to_string(),
                    origin.send(dispatch.message.clone()),
                ),
                DispatchTarget::Device(device_id) => (
                    device_id.clone(),
                    registry.send(device_id, dispatch.message.clone()).await,
                ),
            };

            let result = sent.map_err(|source| HubError::DispatchSendFailure {
                device_id: device_id.clone(),
                source,
            });
            match &result {
                Ok(()) => debug!(
                    event = "dispatch_sent",
                    rule = dispatch.rule,
                    device_id = %device_id,
                    kind = %dispatch.message.kind
                ),
                Err(err) => warn!(
                    event = "dispatch_failed",
                    rule = dispatch.rule,
                    device_id = %device_id,
                    error = %err
                ),
            }
            outcomes.push(DispatchOutcome {
                rule: dispatch.rule,
                result,
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::models::DeviceData;
    use crate::registry::Outbound;
    use chrono::Utc;
    use serde_json::json;

    fn state(device_id: &str, data: serde_json::Value) -> DeviceState {
        DeviceState {
            device_id: device_id.to_string(),
            device_type: "tablet".to_string(),
            last_seen: Utc::now(),
            data: DeviceData::try_from(data).unwrap(),
        }
    }

    struct ForwardBattery;

    impl DispatchRule for ForwardBattery {
        fn name(&self) -> &'static str {
            "forward_battery"
        }

        fn evaluate(&self, state: &DeviceState) -> Option<Dispatch> {
            let level = state.data.get("battery")?.as_i64()?;
            Some(Dispatch {
                rule: self.name(),
                target: DispatchTarget::Device("dashboard".to_string()),
                message: OutboundMessage::new("battery")
                    .with_field("device_id", state.device_id.clone())
                    .with_field("level", level),
            })
        }
    }

    #[test]
    fn wallpaper_rule_requires_string_value() {
        let engine = DispatchEngine::default();
        let hit = engine.evaluate(&state("t1", json!({"new_wallpaper": "http://x/y.png"})));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].target, DispatchTarget::Origin);
        assert_eq!(
            hit[0].message,
            OutboundMessage::wallpaper_update("http://x/y.png")
        );

        assert!(engine.evaluate(&state("t1", json!({"new_wallpaper": 5}))).is_empty());
        assert!(engine.evaluate(&state("t1", json!({"wallpaper": "x"}))).is_empty());
    }

    #[test]
    fn all_matching_rules_fire_in_order() {
        let engine = DispatchEngine::default().with_rule(ForwardBattery);
        let hits = engine.evaluate(&state("t1", json!({"new_wallpaper": "a", "battery": 40})));
        let rules: Vec<&str> = hits.iter().map(|d| d.rule).collect();
        assert_eq!(rules, vec!["wallpaper_update", "forward_battery"]);
        assert_eq!(engine.rule_names(), rules);
    }

    #[tokio::test]
    async fn dispatch_sends_to_origin_and_reports_missing_target() {
        let registry = ConnectionRegistry::new(DuplicatePolicy::Replace);
        let (origin, mut origin_rx) = ConnectionHandle::new(1, "t1", "tablet", 4);
        let engine = DispatchEngine::default().with_rule(ForwardBattery);

        let outcomes = engine
            .dispatch(
                &origin,
                &registry,
                &state("t1", json!({"new_wallpaper": "a.png", "battery": 9})),
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(HubError::DispatchSendFailure {
                source: SendError::NotConnected,
                ..
            })
        ));
        assert_eq!(
            origin_rx.recv().await,
            Some(Outbound::Message(OutboundMessage::wallpaper_update("a.png")))
        );
    }

    #[tokio::test]
    async fn dispatch_routes_device_target_through_registry() {
        let registry = ConnectionRegistry::new(DuplicatePolicy::Replace);
        let (dashboard, mut dashboard_rx) = ConnectionHandle::new(2, "dashboard", "screen", 4);
        registry.register(dashboard).await.unwrap();
        let (origin, mut origin_rx) = ConnectionHandle::new(3, "t1", "tablet", 4);
        let engine = DispatchEngine::new().with_rule(ForwardBattery);

        engine
            .dispatch(&origin, &registry, &state("t1", json!({"battery": 77})))
            .await;

        let expected = OutboundMessage::new("battery")
            .with_field("device_id", "t1")
            .with_field("level", 77);
        assert_eq!(dashboard_rx.recv().await, Some(Outbound::Message(expected)));
        assert!(origin_rx.try_recv().is_err());
    }
}
