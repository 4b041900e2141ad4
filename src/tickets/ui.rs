use serde::{Deserialize, Serialize};

use crate::tickets::intake::{
    FIELD_CAN_JOIN, FIELD_DETAILS, FIELD_OTHER_PARTY, FIELD_REASON, MAX_FIELD_LENGTH, MAX_SHORT_FIELD_LENGTH,
};
use crate::tickets::router::ActionId;
use crate::tickets::{RoleId, Ticket, TicketKind};

pub const PANEL_COLOR: u32 = 0x00FF00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub action: ActionId,
    pub label: &'static str,
    pub style: ControlStyle,
    pub emoji: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Announcement {
    pub content: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub timestamp: bool,
    pub controls: Vec<Control>,
}

impl Announcement {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStyle {
    Short,
    Paragraph,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormInput {
    pub id: &'static str,
    pub label: &'static str,
    pub style: InputStyle,
    pub placeholder: Option<&'static str>,
    pub max_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    pub submit: ActionId,
    pub title: &'static str,
    pub inputs: Vec<FormInput>,
}

impl FormSpec {
    pub fn for_kind(kind: TicketKind) -> Self {
        match kind {
            TicketKind::Support => Self {
                submit: ActionId::SubmitSupportForm,
                title: "New Support Ticket",
                inputs: vec![FormInput {
                    id: FIELD_REASON,
                    label: "Reason for ticket",
                    style: InputStyle::Paragraph,
                    placeholder: None,
                    max_length: MAX_FIELD_LENGTH,
                }],
            },
            TicketKind::Mediation => Self {
                submit: ActionId::SubmitMediationForm,
                title: "Middleman Request",
                inputs: vec![
                    FormInput {
                        id: FIELD_OTHER_PARTY,
                        label: "ID/User of the other person",
                        style: InputStyle::Short,
                        placeholder: Some("Discord ID or @mention"),
                        max_length: MAX_SHORT_FIELD_LENGTH,
                    },
                    FormInput {
                        id: FIELD_DETAILS,
                        label: "details & value",
                        style: InputStyle::Paragraph,
                        placeholder: None,
                        max_length: MAX_FIELD_LENGTH,
                    },
                    FormInput {
                        id: FIELD_CAN_JOIN,
                        label: "can both join private server link?",
                        style: InputStyle::Short,
                        placeholder: Some("Yes / No"),
                        max_length: MAX_SHORT_FIELD_LENGTH,
                    },
                ],
            },
        }
    }
}

const PANEL_TEXT: &str = "Welcome to **MM Service**!\n\n\
If you are in need of an MM, please read our Middleman rules first and then tap the \u{201c}Request middleman\u{201d} button and fill out the form below.\n\n\
\u{2022} You will be required to vouch your middleman after the trade in the vouches channel. Failing to do so within 24 hours will result in a Blacklist from our MM Service.\n\n\
\u{2022} Creating any form of troll tickets will also result in a middleman ban.\n\n\
\u{25c6} : We are **NOT** responsible for anything that happens after the trade is done. As well as any duped items. By opening a ticket or requesting a middleman you have agreed to our middleman rules.";

pub fn setup_panel() -> Announcement {
    Announcement {
        content: None,
        title: Some("Request mm".to_string()),
        description: Some(PANEL_TEXT.to_string()),
        color: Some(PANEL_COLOR),
        timestamp: false,
        controls: vec![
            Control {
                action: ActionId::OpenSupportForm,
                label: "Open a ticket!",
                style: ControlStyle::Primary,
                emoji: Some("\u{1f4e9}"),
            },
            Control {
                action: ActionId::OpenMediationForm,
                label: "Request middleman",
                style: ControlStyle::Secondary,
                emoji: Some("\u{1f91d}"),
            },
        ],
    }
}

pub fn opening_announcement(ticket: &Ticket, staff_role: Option<RoleId>) -> Announcement {
    Announcement {
        content: staff_role.map(RoleId::mention),
        title: None,
        description: Some(ticket.payload.announcement_body(ticket.creator_id)),
        color: Some(ticket.kind.color()),
        timestamp: true,
        controls: vec![
            Control {
                action: ActionId::Claim,
                label: "Claim",
                style: ControlStyle::Success,
                emoji: None,
            },
            Control {
                action: ActionId::Close,
                label: "Close",
                style: ControlStyle::Danger,
                emoji: None,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::intake::Payload;
    use crate::tickets::{SpaceId, UserId};

    #[test]
    fn test_panel_offers_both_forms() {
        let panel = setup_panel();
        let actions: Vec<_> = panel.controls.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![ActionId::OpenSupportForm, ActionId::OpenMediationForm]);
        assert_eq!(panel.color, Some(PANEL_COLOR));
    }

    #[test]
    fn test_form_inputs_match_intake_keys() {
        let support = FormSpec::for_kind(TicketKind::Support);
        assert_eq!(support.submit, ActionId::SubmitSupportForm);
        assert_eq!(support.inputs.len(), 1);
        assert_eq!(support.inputs[0].id, "reason");

        let mediation = FormSpec::for_kind(TicketKind::Mediation);
        let ids: Vec<_> = mediation.inputs.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["other", "trade", "join"]);
        let caps: Vec<_> = mediation.inputs.iter().map(|i| i.max_length).collect();
        assert_eq!(caps, vec![100, 4000, 100]);
    }

    #[test]
    fn test_opening_announcement_mentions_staff() {
        let ticket = Ticket::open(
            SpaceId(10),
            UserId(20),
            "mm-carol".to_string(),
            Payload::Mediation {
                other_party: "dave".to_string(),
                details: "sword".to_string(),
                can_join_shared_space: "Yes".to_string(),
            },
        );
        let announcement = opening_announcement(&ticket, Some(RoleId(30)));
        assert_eq!(announcement.content.as_deref(), Some("<@&30>"));
        assert_eq!(announcement.color, Some(0xFFAA00));
        assert!(announcement.timestamp);
        assert_eq!(announcement.controls[0].action, ActionId::Claim);
        assert_eq!(announcement.controls[1].action, ActionId::Close);
    }
}
