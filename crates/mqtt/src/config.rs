use hostname::get as get_hostname;
use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no MQTT credential configured (set IOTERA_CREDENTIAL or MQTT_USERNAME)")]
    MissingCredential,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Platform-issued credential; doubles as the MQTT username.
    pub credential: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.iotera.io".to_string(),
            port: 1883,
            client_id: default_client_id(),
            credential: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
        }
    }
}

impl MqttConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = MqttConfig::default();

        if let Some(v) = lookup("MQTT_BROKER_HOST") {
            let host = strip_scheme(&v);
            if !host.is_empty() {
                cfg.host = host.to_string();
            }
        }
        if let Some(v) = lookup("MQTT_BROKER_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                cfg.port = p;
            }
        }
        if let Some(v) = lookup("MQTT_CLIENT_ID") {
            if !v.is_empty() {
                cfg.client_id = v;
            }
        }
        if let Some(v) = lookup("IOTERA_CREDENTIAL").or_else(|| lookup("MQTT_USERNAME")) {
            if !v.is_empty() {
                cfg.credential = Some(v);
            }
        }
        if let Some(v) = lookup("MQTT_PASSWORD") {
            if !v.is_empty() {
                cfg.password = Some(v);
            }
        }
        if let Some(v) = lookup("MQTT_KEEP_ALIVE_SECS") {
            if let Ok(s) = v.parse::<u16>() {
                cfg.keep_alive_secs = s;
            }
        }

        cfg
    }

    pub fn credential(&self) -> Result<&str, ConfigError> {
        self.credential.as_deref().ok_or(ConfigError::MissingCredential)
    }
}

// Firmware configs carried the broker as a URI, e.g. `mqtt://mqtt.iotera.io`.
fn strip_scheme(host: &str) -> &str {
    host.trim()
        .strip_prefix("mqtt://")
        .unwrap_or(host.trim())
        .trim_end_matches('/')
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = std::process::id();
    format!("iotera-node-{}-{}", host, pid)
}
