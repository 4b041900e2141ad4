pub mod gateway;
pub mod interactions;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channels::ChannelError;
use crate::config::DiscordConfig;
use crate::tickets::intake::MAX_DESCRIPTION_LENGTH;
use crate::tickets::space::SpacePlatform;
use crate::tickets::ui::{Announcement, ControlStyle, FormSpec, InputStyle};
use crate::tickets::{RoleId, SpaceId, UserId};

const PRIVATE_THREAD: u8 = 12;
const ONE_WEEK_MINUTES: u32 = 10080;
const MEMBERS_PAGE: usize = 1000;
pub const MAX_MESSAGE_LENGTH: usize = 2000;
pub const EPHEMERAL: u64 = 1 << 6;
pub const ADMINISTRATOR: u64 = 1 << 3;

pub struct DiscordClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    application_id: String,
    guild_id: String,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_base.clone(),
            token: config.token.clone(),
            application_id: config.application_id.clone(),
            guild_id: config.guild_id.clone(),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    /// Webhook endpoints authenticate through the interaction token instead.
    fn webhook_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ChannelError> {
        let response = builder.send().await?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ChannelError> {
        let response = Self::send(builder).await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn send_message(
        &self,
        channel: SpaceId,
        message: &MessagePayload,
    ) -> Result<DiscordMessage, ChannelError> {
        message.check_length()?;
        let builder = self
            .request(Method::POST, &format!("/channels/{channel}/messages"))
            .json(message);
        Self::send_json(builder).await
    }

    pub async fn delete_message(&self, channel: SpaceId, message_id: u64) -> Result<(), ChannelError> {
        let builder = self.request(
            Method::DELETE,
            &format!("/channels/{channel}/messages/{message_id}"),
        );
        Self::send(builder).await.map(|_| ())
    }

    pub async fn create_followup(&self, token: &str, message: &MessagePayload) -> Result<(), ChannelError> {
        message.check_length()?;
        let builder = self
            .webhook_request(
                Method::POST,
                &format!("/webhooks/{}/{token}", self.application_id),
            )
            .json(message);
        Self::send(builder).await.map(|_| ())
    }

    pub async fn edit_original(&self, token: &str, message: &MessagePayload) -> Result<(), ChannelError> {
        message.check_length()?;
        let builder = self
            .webhook_request(
                Method::PATCH,
                &format!("/webhooks/{}/{token}/messages/@original", self.application_id),
            )
            .json(message);
        Self::send(builder).await.map(|_| ())
    }

    pub async fn register_guild_commands(
        &self,
        commands: &[CommandDefinition],
    ) -> Result<usize, ChannelError> {
        let builder = self
            .request(
                Method::PUT,
                &format!(
                    "/applications/{}/guilds/{}/commands",
                    self.application_id, self.guild_id
                ),
            )
            .json(commands);
        let registered: Vec<serde_json::Value> = Self::send_json(builder).await?;
        info!("Registered {} guild command(s)", registered.len());
        Ok(registered.len())
    }

    async fn guild_members_page(&self, after: u64) -> Result<Vec<GuildMemberRecord>, ChannelError> {
        let builder = self
            .request(Method::GET, &format!("/guilds/{}/members", self.guild_id))
            .query(&[("limit", MEMBERS_PAGE.to_string()), ("after", after.to_string())]);
        Self::send_json(builder).await
    }
}

async fn check_status(response: Response) -> Result<Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let header_retry = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<f64>().ok());
        let body_retry = response
            .json::<RateLimitBody>()
            .await
            .ok()
            .map(|b| b.retry_after);
        return Err(ChannelError::RateLimited {
            retry_after: body_retry.or(header_retry),
        });
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => ChannelError::AuthenticationFailed(error_text),
        StatusCode::FORBIDDEN => ChannelError::Forbidden(error_text),
        StatusCode::NOT_FOUND => ChannelError::NotFound(error_text),
        _ => ChannelError::ApiError {
            code: Some(status.to_string()),
            message: error_text,
        },
    })
}

#[async_trait]
impl SpacePlatform for DiscordClient {
    async fn create_private_space(
        &self,
        parent: SpaceId,
        name: &str,
        reason: &str,
    ) -> Result<SpaceId, ChannelError> {
        let body = CreateThread {
            name: name.to_string(),
            auto_archive_duration: ONE_WEEK_MINUTES,
            kind: PRIVATE_THREAD,
            invitable: false,
        };
        let builder = self
            .request(Method::POST, &format!("/channels/{parent}/threads"))
            .header("X-Audit-Log-Reason", reason)
            .json(&body);
        let thread: ChannelRecord = Self::send_json(builder).await?;
        let id = parse_snowflake(&thread.id)?;
        info!("Created private thread {id} '{name}' under {parent}");
        Ok(SpaceId(id))
    }

    async fn add_member(&self, space: SpaceId, user: UserId) -> Result<(), ChannelError> {
        let builder = self.request(
            Method::PUT,
            &format!("/channels/{space}/thread-members/{user}"),
        );
        Self::send(builder).await?;
        debug!("Added {user} to thread {space}");
        Ok(())
    }

    async fn rename_space(&self, space: SpaceId, name: &str) -> Result<(), ChannelError> {
        let builder = self
            .request(Method::PATCH, &format!("/channels/{space}"))
            .json(&serde_json::json!({ "name": name }));
        Self::send(builder).await.map(|_| ())
    }

    async fn delete_space(&self, space: SpaceId) -> Result<(), ChannelError> {
        let builder = self.request(Method::DELETE, &format!("/channels/{space}"));
        Self::send(builder).await.map(|_| ())
    }

    async fn role_members(&self, role: RoleId) -> Result<Vec<UserId>, ChannelError> {
        let role_key = role.to_string();
        let mut members = Vec::new();
        let mut after = 0u64;
        loop {
            let page = self.guild_members_page(after).await?;
            let page_len = page.len();
            for record in page {
                let Some(user) = record.user else { continue };
                let id = parse_snowflake(&user.id)?;
                after = after.max(id);
                if !user.bot && record.roles.iter().any(|r| *r == role_key) {
                    members.push(UserId(id));
                }
            }
            if page_len < MEMBERS_PAGE {
                break;
            }
        }
        Ok(members)
    }
}

pub fn parse_snowflake(raw: &str) -> Result<u64, ChannelError> {
    raw.parse().map_err(|_| ChannelError::ApiError {
        code: None,
        message: format!("Invalid snowflake: {raw}"),
    })
}

#[derive(Debug, Serialize)]
struct CreateThread {
    name: String,
    auto_archive_duration: u32,
    #[serde(rename = "type")]
    kind: u8,
    invitable: bool,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct ChannelRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GuildMemberRecord {
    user: Option<UserRecord>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<DiscordEmbed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ActionRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            flags: Some(EPHEMERAL),
            ..Self::text(content)
        }
    }

    pub fn replying_to(mut self, message_id: u64) -> Self {
        self.message_reference = Some(MessageReference {
            message_id: message_id.to_string(),
        });
        self
    }

    pub fn from_announcement(announcement: &Announcement) -> Self {
        let has_embed = announcement.title.is_some() || announcement.description.is_some();
        let embeds = if has_embed {
            vec![DiscordEmbed {
                title: announcement.title.clone(),
                description: announcement.description.clone(),
                color: announcement.color,
                timestamp: announcement
                    .timestamp
                    .then(|| chrono::Utc::now().to_rfc3339()),
            }]
        } else {
            Vec::new()
        };

        let components = if announcement.controls.is_empty() {
            Vec::new()
        } else {
            vec![ActionRow::new(
                announcement
                    .controls
                    .iter()
                    .map(|c| Component {
                        kind: COMPONENT_BUTTON,
                        custom_id: c.action.as_str().to_string(),
                        label: Some(c.label.to_string()),
                        style: Some(button_style(c.style)),
                        emoji: c.emoji.map(|name| Emoji {
                            name: name.to_string(),
                        }),
                        ..Default::default()
                    })
                    .collect(),
            )]
        };

        Self {
            content: announcement.content.clone(),
            embeds,
            components,
            ..Default::default()
        }
    }

    fn check_length(&self) -> Result<(), ChannelError> {
        let actual_length = self.content.as_deref().map_or(0, |c| c.chars().count());
        if actual_length > MAX_MESSAGE_LENGTH {
            return Err(ChannelError::ContentTooLong {
                max_length: MAX_MESSAGE_LENGTH,
                actual_length,
            });
        }
        for embed in &self.embeds {
            let actual_length = embed.description.as_deref().map_or(0, |d| d.chars().count());
            if actual_length > MAX_DESCRIPTION_LENGTH {
                return Err(ChannelError::ContentTooLong {
                    max_length: MAX_DESCRIPTION_LENGTH,
                    actual_length,
                });
            }
        }
        Ok(())
    }
}

fn button_style(style: ControlStyle) -> u8 {
    match style {
        ControlStyle::Primary => 1,
        ControlStyle::Secondary => 2,
        ControlStyle::Success => 3,
        ControlStyle::Danger => 4,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageReference {
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscordEmbed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const COMPONENT_TEXT_INPUT: u8 = 4;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: u8,
    pub components: Vec<Component>,
}

impl ActionRow {
    fn new(components: Vec<Component>) -> Self {
        Self {
            kind: COMPONENT_ACTION_ROW,
            components,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: u8,
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<Emoji>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Emoji {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModalPayload {
    pub custom_id: String,
    pub title: String,
    pub components: Vec<ActionRow>,
}

impl ModalPayload {
    pub fn from_form(form: &FormSpec) -> Self {
        Self {
            custom_id: form.submit.as_str().to_string(),
            title: form.title.to_string(),
            components: form
                .inputs
                .iter()
                .map(|input| {
                    ActionRow::new(vec![Component {
                        kind: COMPONENT_TEXT_INPUT,
                        custom_id: input.id.to_string(),
                        label: Some(input.label.to_string()),
                        style: Some(match input.style {
                            InputStyle::Short => 1,
                            InputStyle::Paragraph => 2,
                        }),
                        required: Some(true),
                        placeholder: input.placeholder.map(str::to_string),
                        max_length: Some(input.max_length),
                        ..Default::default()
                    }])
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOptionDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandOptionDefinition {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    pub description: String,
    pub required: bool,
}

const OPTION_USER: u8 = 6;

/// Slash commands served by the interaction endpoint.
pub fn ticket_commands() -> Vec<CommandDefinition> {
    vec![
        CommandDefinition {
            name: "setup".to_string(),
            description: "Post the ticket panel in this channel".to_string(),
            options: Vec::new(),
        },
        CommandDefinition {
            name: "add".to_string(),
            description: "Add a member to this ticket".to_string(),
            options: vec![CommandOptionDefinition {
                kind: OPTION_USER,
                name: "user".to_string(),
                description: "Member to add".to_string(),
                required: true,
            }],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::intake::{intake, MAX_FIELD_LENGTH};
    use crate::tickets::router::ActionId;
    use crate::tickets::ui::{opening_announcement, setup_panel};
    use crate::tickets::{SpaceId, Ticket, TicketKind, UserId};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_panel_serializes_buttons() {
        let payload = MessagePayload::from_announcement(&setup_panel());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["embeds"][0]["title"], "Request mm");
        assert_eq!(value["embeds"][0]["color"], 0x00FF00);
        assert!(value["embeds"][0].get("timestamp").is_none());
        let buttons = &value["components"][0]["components"];
        assert_eq!(value["components"][0]["type"], 1);
        assert_eq!(buttons[0]["custom_id"], "open_regular_ticket");
        assert_eq!(buttons[0]["style"], 1);
        assert_eq!(buttons[0]["emoji"]["name"], "\u{1f4e9}");
        assert_eq!(buttons[1]["custom_id"], "open_middleman");
        assert_eq!(buttons[1]["style"], 2);
        assert!(value.get("content").is_none());
    }

    #[test]
    fn test_modal_from_form() {
        let modal = ModalPayload::from_form(&FormSpec::for_kind(TicketKind::Mediation));
        let value = serde_json::to_value(&modal).unwrap();
        assert_eq!(value["custom_id"], ActionId::SubmitMediationForm.as_str());
        assert_eq!(value["title"], "Middleman Request");
        let first = &value["components"][0]["components"][0];
        assert_eq!(first["type"], 4);
        assert_eq!(first["custom_id"], "other");
        assert_eq!(first["style"], 1);
        assert_eq!(first["required"], true);
        assert_eq!(first["placeholder"], "Discord ID or @mention");
        assert_eq!(first["max_length"], 100);
        assert_eq!(value["components"][1]["components"][0]["style"], 2);
        assert_eq!(value["components"][1]["components"][0]["max_length"], 4000);
        assert_eq!(value["components"][2]["components"][0]["max_length"], 100);
    }

    #[test]
    fn test_ephemeral_reply_payload() {
        let payload = MessagePayload::ephemeral("Ticket already claimed.").replying_to(42);
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "content": "Ticket already claimed.",
                "flags": 64,
                "message_reference": { "message_id": "42" }
            })
        );
    }

    #[test]
    fn test_overlong_content_rejected() {
        let payload = MessagePayload::text("x".repeat(MAX_MESSAGE_LENGTH + 1));
        assert!(matches!(
            payload.check_length(),
            Err(ChannelError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn test_overlong_embed_rejected() {
        let payload = MessagePayload::from_announcement(&Announcement {
            description: Some("x".repeat(MAX_DESCRIPTION_LENGTH + 1)),
            ..Default::default()
        });
        assert!(matches!(
            payload.check_length(),
            Err(ChannelError::ContentTooLong { max_length: MAX_DESCRIPTION_LENGTH, .. })
        ));
    }

    #[test]
    fn test_longest_mediation_announcement_is_sendable() {
        let fields: HashMap<String, String> = ["other", "trade", "join"]
            .into_iter()
            .map(|key| (key.to_string(), "w".repeat(MAX_FIELD_LENGTH)))
            .collect();
        let payload = intake(TicketKind::Mediation, &fields).unwrap();
        let ticket = Ticket::open(SpaceId(10), UserId(18446744073709551615), "mm-carol".to_string(), payload);

        let message = MessagePayload::from_announcement(&opening_announcement(&ticket, Some(RoleId(30))));
        assert!(message.check_length().is_ok());
        let description = message.embeds[0].description.as_deref().unwrap();
        assert_eq!(description.chars().count(), MAX_DESCRIPTION_LENGTH);
    }

    fn client_for(server: &mockito::Server) -> DiscordClient {
        DiscordClient::new(&DiscordConfig {
            token: "token".to_string(),
            application_id: "1".to_string(),
            public_key: String::new(),
            guild_id: "2".to_string(),
            api_base: server.url(),
        })
    }

    #[tokio::test]
    async fn test_create_private_thread() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/channels/42/threads")
            .match_header("authorization", "Bot token")
            .match_body(mockito::Matcher::PartialJson(json!({
                "name": "ticket-alice",
                "type": 12,
                "auto_archive_duration": 10080,
                "invitable": false
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"900000000000000001","type":12}"#)
            .create_async()
            .await;

        let id = client_for(&server)
            .create_private_space(SpaceId(42), "ticket-alice", "Ticket request")
            .await
            .unwrap();
        assert_eq!(id, SpaceId(900000000000000001));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_and_permission_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/channels/7")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"You are being rate limited.","retry_after":1.5,"global":false}"#)
            .create_async()
            .await;
        server
            .mock("PUT", "/channels/7/thread-members/8")
            .with_status(403)
            .with_body(r#"{"message":"Missing Access","code":50001}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        match client.rename_space(SpaceId(7), "ticket-x").await {
            Err(ChannelError::RateLimited { retry_after }) => assert_eq!(retry_after, Some(1.5)),
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(matches!(
            client.add_member(SpaceId(7), UserId(8)).await,
            Err(ChannelError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_role_members_skip_bots_and_other_roles() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/guilds/2/members")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    { "user": { "id": "11", "username": "sam" }, "roles": ["5"] },
                    { "user": { "id": "12", "username": "helper", "bot": true }, "roles": ["5"] },
                    { "user": { "id": "13", "username": "alice" }, "roles": ["6"] }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let staff = client_for(&server).role_members(RoleId(5)).await.unwrap();
        assert_eq!(staff, vec![UserId(11)]);
    }

    #[test]
    fn test_commands_definition() {
        let value = serde_json::to_value(ticket_commands()).unwrap();
        assert_eq!(value[0]["name"], "setup");
        assert!(value[0].get("options").is_none());
        assert_eq!(value[1]["options"][0]["type"], 6);
        assert_eq!(value[1]["options"][0]["name"], "user");
    }
}
