use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::tickets::{TicketError, TicketKind, UserId};

pub const FIELD_REASON: &str = "reason";
pub const FIELD_OTHER_PARTY: &str = "other";
pub const FIELD_DETAILS: &str = "trade";
pub const FIELD_CAN_JOIN: &str = "join";

/// Longest value a modal text input may carry.
pub const MAX_FIELD_LENGTH: usize = 4000;
/// Cap for the one-line inputs (other party, join answer).
pub const MAX_SHORT_FIELD_LENGTH: usize = 100;
/// Discord rejects embeds whose description exceeds this many characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

pub const ADD_USAGE: &str = "Usage: `$add @user` or `$add 123456789012345678`";

static MEMBER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{17,20}$").expect("Invalid member id regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("Missing form field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Support {
        reason: String,
    },
    Mediation {
        other_party: String,
        details: String,
        can_join_shared_space: String,
    },
}

impl Payload {
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::Support { .. } => TicketKind::Support,
            Self::Mediation { .. } => TicketKind::Mediation,
        }
    }

    /// Body of the opening embed. The free-text field gives way when the
    /// whole body would not fit in one embed description.
    pub fn announcement_body(&self, creator: UserId) -> String {
        let header = format!("**Opened by** {}\n\n", creator.mention());
        let (before, text, after) = match self {
            Self::Support { reason } => (format!("{header}**Reason:** "), reason.as_str(), String::new()),
            Self::Mediation {
                other_party,
                details,
                can_join_shared_space,
            } => (
                format!("{header}**Other person:** {other_party}\n**Trade details:** "),
                details.as_str(),
                format!("\n**Can join priv server?** {can_join_shared_space}"),
            ),
        };
        let budget = MAX_DESCRIPTION_LENGTH.saturating_sub(before.chars().count() + after.chars().count());
        let body = format!("{before}{}{after}", truncate_chars(text, budget));
        truncate_chars(&body, MAX_DESCRIPTION_LENGTH)
    }
}

pub fn intake(kind: TicketKind, raw_fields: &HashMap<String, String>) -> Result<Payload, IntakeError> {
    match kind {
        TicketKind::Support => Ok(Payload::Support {
            reason: required(raw_fields, FIELD_REASON, MAX_FIELD_LENGTH)?,
        }),
        TicketKind::Mediation => Ok(Payload::Mediation {
            other_party: required(raw_fields, FIELD_OTHER_PARTY, MAX_SHORT_FIELD_LENGTH)?,
            details: required(raw_fields, FIELD_DETAILS, MAX_FIELD_LENGTH)?,
            can_join_shared_space: required(raw_fields, FIELD_CAN_JOIN, MAX_SHORT_FIELD_LENGTH)?,
        }),
    }
}

fn required(fields: &HashMap<String, String>, key: &'static str, max: usize) -> Result<String, IntakeError> {
    let value = fields
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(IntakeError::MissingField(key))?;
    Ok(truncate_chars(value, max))
}

pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Accepts a raw id or a mention (`<@id>`, `<@!id>`) and yields the member id.
pub fn parse_member_reference(raw: Option<&str>) -> Result<UserId, TicketError> {
    let raw = raw
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| TicketError::Validation(ADD_USAGE.to_string()))?;

    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '<' | '@' | '!' | '>'))
        .collect();

    if !MEMBER_ID.is_match(&stripped) {
        return Err(TicketError::Validation("Invalid user.".to_string()));
    }

    stripped
        .parse()
        .map_err(|_| TicketError::Validation("Invalid user.".to_string()))
}
