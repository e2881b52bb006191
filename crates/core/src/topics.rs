// Topic layout helpers matching the Iotera platform.
//
// Every device topic is derived from the MQTT credential, which the platform
// issues as `<prefix>_<org>_<device>`. The device segment is the whole
// remainder and may contain further underscores.

use thiserror::Error;

pub const ROOT: &str = "iotera";
pub const PUB: &str = "pub";
pub const SUB: &str = "sub";

pub const DEFAULT_MAX_ORG_LEN: usize = 64;
pub const DEFAULT_MAX_DEVICE_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("credential has {found} underscore delimiter(s), expected at least 2")]
    MissingDelimiter { found: usize },
    #[error("{segment} segment is {len} bytes, maximum is {max}")]
    SegmentTooLong {
        segment: &'static str,
        len: usize,
        max: usize,
    },
}

/// Upper bounds on the org and device segments of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicLimits {
    pub max_org_len: usize,
    pub max_device_len: usize,
}

impl Default for TopicLimits {
    fn default() -> Self {
        Self {
            max_org_len: DEFAULT_MAX_ORG_LEN,
            max_device_len: DEFAULT_MAX_DEVICE_LEN,
        }
    }
}

/// The full set of per-device topics, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub org: String,
    pub device: String,
    pub telemetry: String,
    pub online: String,
    pub offline: String,
    pub command: String,
    pub command_result: String,
}

impl TopicSet {
    pub fn derive(credential: &str) -> Result<Self, ParseError> {
        Self::derive_with_limits(credential, TopicLimits::default())
    }

    pub fn derive_with_limits(credential: &str, limits: TopicLimits) -> Result<Self, ParseError> {
        let (org, device) = split_credential(credential)?;

        if org.len() > limits.max_org_len {
            return Err(ParseError::SegmentTooLong {
                segment: "org",
                len: org.len(),
                max: limits.max_org_len,
            });
        }
        if device.len() > limits.max_device_len {
            return Err(ParseError::SegmentTooLong {
                segment: "device",
                len: device.len(),
                max: limits.max_device_len,
            });
        }

        Ok(Self::for_device(org, device))
    }

    pub fn for_device(org: &str, device: &str) -> Self {
        Self {
            org: org.to_string(),
            device: device.to_string(),
            telemetry: telemetry_topic(org, device),
            online: online_topic(org, device),
            offline: offline_topic(org, device),
            command: command_topic(org, device),
            command_result: command_result_topic(org, device),
        }
    }
}

/// Splits `<prefix>_<org>_<device>` into `(org, device)`.
fn split_credential(credential: &str) -> Result<(&str, &str), ParseError> {
    let missing = || ParseError::MissingDelimiter {
        found: credential.matches('_').count(),
    };
    let (_prefix, rest) = credential.split_once('_').ok_or_else(missing)?;
    let (org, device) = rest.split_once('_').ok_or_else(missing)?;
    Ok((org, device))
}

fn publish_root(org: &str, device: &str) -> String {
    format!("{}/{}/{}/{}", ROOT, PUB, org, device)
}

pub fn telemetry_topic(org: &str, device: &str) -> String {
    format!("{}/data", publish_root(org, device))
}

pub fn online_topic(org: &str, device: &str) -> String {
    format!("{}/online", publish_root(org, device))
}

pub fn offline_topic(org: &str, device: &str) -> String {
    format!("{}/offline", publish_root(org, device))
}

pub fn command_result_topic(org: &str, device: &str) -> String {
    format!("{}/command_result", publish_root(org, device))
}

pub fn command_topic(org: &str, device: &str) -> String {
    format!("{}/{}/{}/{}/command", ROOT, SUB, org, device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_all_topics_from_credential() {
        let topics =
            TopicSet::derive("mqtt_1000000181_eaaeb0b6-d102-4180-8e5d-9ea2f1f78501").unwrap();
        assert_eq!(topics.org, "1000000181");
        assert_eq!(topics.device, "eaaeb0b6-d102-4180-8e5d-9ea2f1f78501");
        assert_eq!(
            topics.telemetry,
            "iotera/pub/1000000181/eaaeb0b6-d102-4180-8e5d-9ea2f1f78501/data"
        );
        assert_eq!(
            topics.online,
            "iotera/pub/1000000181/eaaeb0b6-d102-4180-8e5d-9ea2f1f78501/online"
        );
        assert_eq!(
            topics.offline,
            "iotera/pub/1000000181/eaaeb0b6-d102-4180-8e5d-9ea2f1f78501/offline"
        );
        assert_eq!(
            topics.command,
            "iotera/sub/1000000181/eaaeb0b6-d102-4180-8e5d-9ea2f1f78501/command"
        );
        assert_eq!(
            topics.command_result,
            "iotera/pub/1000000181/eaaeb0b6-d102-4180-8e5d-9ea2f1f78501/command_result"
        );
    }

    #[test]
    fn device_keeps_embedded_underscores() {
        let topics = TopicSet::derive("mqtt_acme_sensor_node_7").unwrap();
        assert_eq!(topics.org, "acme");
        assert_eq!(topics.device, "sensor_node_7");
        assert_eq!(topics.telemetry, "iotera/pub/acme/sensor_node_7/data");
    }

    #[test]
    fn trailing_underscore_gives_empty_device() {
        let topics = TopicSet::derive("x_a_").unwrap();
        assert_eq!(topics.org, "a");
        assert_eq!(topics.device, "");
        assert_eq!(topics.command, "iotera/sub/a//command");
    }

    #[test]
    fn rejects_too_few_delimiters() {
        assert_eq!(
            TopicSet::derive("nodelimiter"),
            Err(ParseError::MissingDelimiter { found: 0 })
        );
        assert_eq!(
            TopicSet::derive("mqtt_orgonly"),
            Err(ParseError::MissingDelimiter { found: 1 })
        );
    }

    #[test]
    fn enforces_segment_limits() {
        let limits = TopicLimits { max_org_len: 3, max_device_len: 4 };
        assert!(TopicSet::derive_with_limits("p_abc_dev1", limits).is_ok());
        assert_eq!(
            TopicSet::derive_with_limits("p_abcd_dev1", limits),
            Err(ParseError::SegmentTooLong { segment: "org", len: 4, max: 3 })
        );
        assert_eq!(
            TopicSet::derive_with_limits("p_abc_dev_1", limits),
            Err(ParseError::SegmentTooLong { segment: "device", len: 5, max: 4 })
        );
    }

    #[test]
    fn default_limits_match_platform_sizing() {
        let org = "o".repeat(DEFAULT_MAX_ORG_LEN);
        let device = "d".repeat(DEFAULT_MAX_DEVICE_LEN);
        assert!(TopicSet::derive(&format!("p_{org}_{device}")).is_ok());
        assert!(TopicSet::derive(&format!("p_{org}o_{device}")).is_err());
        assert!(TopicSet::derive(&format!("p_{org}_{device}d")).is_err());
    }

    proptest::proptest! {
        #[test]
        fn org_and_full_remainder_survive_derivation(
            prefix in "[a-z]{1,8}",
            org in "[A-Za-z0-9-]{1,32}",
            device in "[A-Za-z0-9_-]{0,64}",
        ) {
            let topics = TopicSet::derive(&format!("{prefix}_{org}_{device}")).unwrap();
            proptest::prop_assert_eq!(&topics.org, &org);
            proptest::prop_assert_eq!(&topics.device, &device);
            proptest::prop_assert_eq!(topics.telemetry, format!("iotera/pub/{org}/{device}/data"));
            proptest::prop_assert_eq!(topics.command, format!("iotera/sub/{org}/{device}/command"));
        }
    }
}
