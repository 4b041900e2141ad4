use std::collections::HashMap;
use std::time::Duration;

use crate::tickets::{RoleId, SpaceId};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_CLOSE_DELAY_SECS: u64 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub server: ServerConfig,
    pub tickets: TicketConfig,
}

#[derive(Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub application_id: String,
    pub public_key: String,
    pub guild_id: String,
    pub api_base: String,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub staff_role: RoleId,
    pub log_channel: Option<SpaceId>,
    pub close_delay: Duration,
    pub command_prefix: String,
}

impl TicketConfig {
    pub fn new(staff_role: RoleId) -> Self {
        Self {
            staff_role,
            log_channel: None,
            close_delay: Duration::from_secs(DEFAULT_CLOSE_DELAY_SECS),
            command_prefix: "$".to_string(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"<redacted>")
            .field("application_id", &self.application_id)
            .field("guild_id", &self.guild_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).map(str::to_string).ok_or(ConfigError::Missing(key));

        let discord = DiscordConfig {
            token: required("DISCORD_TOKEN")?,
            application_id: required("DISCORD_APPLICATION_ID")?,
            public_key: required("DISCORD_PUBLIC_KEY")?,
            guild_id: required("DISCORD_GUILD_ID")?,
            api_base: get("DISCORD_API_BASE")
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
        };

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or("0.0.0.0").to_string(),
            port: parse_or("SERVER_PORT", get("SERVER_PORT"), 8080)?,
        };

        let staff_role = get("STAFF_ROLE_ID").ok_or(ConfigError::Missing("STAFF_ROLE_ID"))?;
        let tickets = TicketConfig {
            staff_role: staff_role.parse().map_err(|_| ConfigError::Invalid {
                key: "STAFF_ROLE_ID",
                value: staff_role.to_string(),
            })?,
            log_channel: get("LOG_CHANNEL_ID")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        key: "LOG_CHANNEL_ID",
                        value: v.to_string(),
                    })
                })
                .transpose()?,
            close_delay: Duration::from_secs(parse_or(
                "TICKET_CLOSE_DELAY_SECS",
                get("TICKET_CLOSE_DELAY_SECS"),
                DEFAULT_CLOSE_DELAY_SECS,
            )?),
            command_prefix: get("COMMAND_PREFIX").unwrap_or("$").to_string(),
        };

        Ok(Self {
            discord,
            server,
            tickets,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<&str>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key,
            value: v.to_string(),
        }),
        None => Ok(default),
    }
}
