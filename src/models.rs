use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalKind {
    Time,
    Location,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl ProposalStatus {
    /// Pending and accepted proposals are the only ones that can become authoritative.
    pub fn is_active(self) -> bool {
        matches!(self, ProposalStatus::Pending | ProposalStatus::Accepted)
    }
}

/// A named meeting point, as returned by place search or typed by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingLocation {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MeetingLocation {
    pub fn named(name: &str) -> Self {
        MeetingLocation {
            name: name.to_string(),
            latitude: None,
            longitude: None,
        }
    }

    pub fn with_coordinates(name: &str, latitude: f64, longitude: f64) -> Self {
        MeetingLocation {
            name: name.to_string(),
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProposedValue {
    Time(DateTime<Utc>),
    Location(MeetingLocation),
}

impl ProposedValue {
    pub fn kind(&self) -> ProposalKind {
        match self {
            ProposedValue::Time(_) => ProposalKind::Time,
            ProposedValue::Location(_) => ProposalKind::Location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub id: String,
    pub status: ProposalStatus,
    pub value: ProposedValue,
    pub proposer_is_self: bool,
    pub proposer_display_name: String,
    pub message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn kind(&self) -> ProposalKind {
        self.value.kind()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sending,   // Optimistically inserted, request in flight
    Sent,      // Server accepted our message
    Delivered, // Counterparty message fetched from the server
    Failed,    // Send failed, waits for a manual resend
}

impl DeliveryStatus {
    /// Only `Sending` may move, and only forward.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (DeliveryStatus::Sending, DeliveryStatus::Sent)
                | (DeliveryStatus::Sending, DeliveryStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub from_self: bool,
    pub delivery_status: DeliveryStatus,
}

impl ChatMessage {
    /// Builds a message as fetched from the server: ours count as sent, theirs as delivered.
    pub fn from_server(id: &str, text: &str, sent_at: DateTime<Utc>, from_self: bool) -> Self {
        ChatMessage {
            id: id.to_string(),
            text: text.to_string(),
            sent_at,
            from_self,
            delivery_status: if from_self {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Delivered
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    #[serde(default)]
    pub active_listings: u32,
    #[serde(default)]
    pub pending_actions: u32,
    #[serde(default)]
    pub completed_exchanges: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasedContact {
    pub listing_id: String,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationSummary {
    pub listing_id: String,
    pub counterparty_name: String,
    #[serde(default)]
    pub status_hint: Option<String>,
}
