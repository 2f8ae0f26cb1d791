//! Topic construction for device telemetry, status, and alerts
//!
//! Topics follow `{prefix}/{device_id}/{telemetry|status|alerts}`. Broker
//! policies match on exact levels, so empty levels are collapsed and leading
//! or trailing slashes are dropped.

use serde::Serialize;

/// Collapse repeated slashes and strip leading/trailing ones
pub fn canonicalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Outbound message channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    Telemetry,
    Status,
    Alerts,
}

impl TopicKind {
    pub const ALL: [TopicKind; 3] = [TopicKind::Telemetry, TopicKind::Status, TopicKind::Alerts];

    pub fn suffix(&self) -> &'static str {
        match self {
            TopicKind::Telemetry => "telemetry",
            TopicKind::Status => "status",
            TopicKind::Alerts => "alerts",
        }
    }
}

/// The three topics of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSet {
    pub telemetry: String,
    pub status: String,
    pub alerts: String,
}

impl TopicSet {
    pub fn get(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::Telemetry => &self.telemetry,
            TopicKind::Status => &self.status,
            TopicKind::Alerts => &self.alerts,
        }
    }
}

/// Builds topics for a single device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    prefix: String,
    device_id: String,
}

impl TopicBuilder {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        Self {
            prefix: canonicalize_topic(prefix),
            device_id: device_id.to_string(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn build(&self, kind: TopicKind) -> String {
        canonicalize_topic(&format!(
            "{}/{}/{}",
            self.prefix,
            self.device_id,
            kind.suffix()
        ))
    }

    pub fn telemetry(&self) -> String {
        self.build(TopicKind::Telemetry)
    }

    pub fn status(&self) -> String {
        self.build(TopicKind::Status)
    }

    pub fn alerts(&self) -> String {
        self.build(TopicKind::Alerts)
    }

    pub fn topic_set(&self) -> TopicSet {
        TopicSet {
            telemetry: self.telemetry(),
            status: self.status(),
            alerts: self.alerts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn canonicalize_topic_is_idempotent(topic in ".*") {
            let first = canonicalize_topic(&topic);
            let second = canonicalize_topic(&first);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn canonicalize_topic_has_no_empty_levels(topic in "[a-z/]{0,40}") {
            let result = canonicalize_topic(&topic);
            prop_assert!(!result.contains("//"), "double slash in {}", result);
            prop_assert!(!result.starts_with('/'));
            prop_assert!(!result.ends_with('/'));
        }
    }

    #[test]
    fn test_topic_layout() {
        let topics = TopicBuilder::new("agriculture/sensors", "farm-001");

        assert_eq!(topics.telemetry(), "agriculture/sensors/farm-001/telemetry");
        assert_eq!(topics.status(), "agriculture/sensors/farm-001/status");
        assert_eq!(topics.alerts(), "agriculture/sensors/farm-001/alerts");
    }

    #[test]
    fn test_prefix_slashes_are_normalized() {
        let topics = TopicBuilder::new("/agriculture//sensors/", "farm-001");
        assert_eq!(topics.status(), "agriculture/sensors/farm-001/status");
    }

    #[test]
    fn test_topic_set_matches_builder() {
        let topics = TopicBuilder::new("farm", "dev");
        let set = topics.topic_set();

        for kind in TopicKind::ALL {
            assert_eq!(set.get(kind), topics.build(kind));
        }
    }
}
