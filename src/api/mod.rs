// Backend API for the exchange service
// The negotiation core only talks to the backend through the ExchangeApi trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    ChatMessage, DashboardSummary, MeetingLocation, NegotiationSummary, Proposal, ProposedValue,
    PurchasedContact,
};

pub mod http;

pub use http::HttpExchangeApi;

/// The meeting as the server currently records it, including payment timestamps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentMeeting {
    pub time: Option<DateTime<Utc>>,
    pub location: Option<MeetingLocation>,
    pub agreed_at: Option<DateTime<Utc>>,
    pub self_paid_at: Option<DateTime<Utc>>,
    pub counterparty_paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of GetMeetingProposals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposalsSnapshot {
    pub proposals: Vec<Proposal>,
    pub current_meeting: Option<CurrentMeeting>,
    pub display_status_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingResponse {
    Accepted,
    Rejected,
}

impl MeetingResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            MeetingResponse::Accepted => "accepted",
            MeetingResponse::Rejected => "rejected",
        }
    }
}

/// Authenticated operations against the exchange backend.
///
/// Every call carries the session token as a request parameter. Implementations
/// map server-reported failures to `ExchangeError::Rejected` and transport or
/// decoding failures to `Network` / `Malformed`.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_meeting_proposals(&self, token: &str, listing_id: &str) -> Result<ProposalsSnapshot>;

    async fn propose_meeting(
        &self,
        token: &str,
        listing_id: &str,
        value: &ProposedValue,
        message: Option<&str>,
    ) -> Result<()>;

    async fn respond_to_meeting(
        &self,
        token: &str,
        proposal_id: &str,
        response: MeetingResponse,
    ) -> Result<()>;

    async fn get_contact_messages(&self, token: &str, listing_id: &str) -> Result<Vec<ChatMessage>>;

    async fn send_contact_message(&self, token: &str, listing_id: &str, text: &str) -> Result<()>;

    async fn process_payment(&self, token: &str, listing_id: &str) -> Result<()>;

    /// Returns the counterparty's user id, used to scope the rating prompt.
    async fn complete_exchange(&self, token: &str, listing_id: &str) -> Result<String>;

    async fn submit_rating(
        &self,
        token: &str,
        listing_id: &str,
        rated_user_id: &str,
        stars: u8,
        comment: Option<&str>,
    ) -> Result<()>;

    async fn get_dashboard_summary(&self, token: &str) -> Result<DashboardSummary>;

    async fn get_purchased_contacts(&self, token: &str) -> Result<Vec<PurchasedContact>>;

    async fn get_negotiations(&self, token: &str) -> Result<Vec<NegotiationSummary>>;
}
