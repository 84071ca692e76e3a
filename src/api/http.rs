// HTTP implementation of the exchange backend API
// Every operation is a JSON POST to {base_url}/api/{Operation} answered by a JSON envelope

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{CurrentMeeting, ExchangeApi, MeetingResponse, ProposalsSnapshot};
use crate::config::SessionConfig;
use crate::error::{ExchangeError, Result};
use crate::models::{
    ChatMessage, DashboardSummary, MeetingLocation, NegotiationSummary, Proposal, ProposalKind,
    ProposalStatus, ProposedValue, PurchasedContact,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProposal {
    id: String,
    #[serde(rename = "type")]
    kind: ProposalKind,
    status: ProposalStatus,
    #[serde(default)]
    proposed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    location_name: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    is_mine: bool,
    #[serde(default)]
    proposer_name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    responded_at: Option<DateTime<Utc>>,
}

impl TryFrom<WireProposal> for Proposal {
    type Error = ExchangeError;

    fn try_from(wire: WireProposal) -> Result<Self> {
        let value = match wire.kind {
            ProposalKind::Time => match wire.proposed_time {
                Some(at) => ProposedValue::Time(at),
                None => {
                    return Err(ExchangeError::Malformed(format!(
                        "time proposal {} has no proposedTime",
                        wire.id
                    )))
                }
            },
            ProposalKind::Location => match wire.location_name {
                Some(name) => ProposedValue::Location(MeetingLocation {
                    name,
                    latitude: wire.latitude,
                    longitude: wire.longitude,
                }),
                None => {
                    return Err(ExchangeError::Malformed(format!(
                        "location proposal {} has no locationName",
                        wire.id
                    )))
                }
            },
        };

        Ok(Proposal {
            id: wire.id,
            status: wire.status,
            value,
            proposer_is_self: wire.is_mine,
            proposer_display_name: wire.proposer_name,
            message: wire.message,
            created_at: wire.created_at,
            responded_at: wire.responded_at,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMeeting {
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    location_name: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    agreed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    my_paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    counterparty_paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl From<WireMeeting> for CurrentMeeting {
    fn from(wire: WireMeeting) -> Self {
        CurrentMeeting {
            time: wire.time,
            location: wire.location_name.map(|name| MeetingLocation {
                name,
                latitude: wire.latitude,
                longitude: wire.longitude,
            }),
            agreed_at: wire.agreed_at,
            self_paid_at: wire.my_paid_at,
            counterparty_paid_at: wire.counterparty_paid_at,
            completed_at: wire.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposalsPayload {
    #[serde(default)]
    proposals: Vec<WireProposal>,
    #[serde(default)]
    current_meeting: Option<WireMeeting>,
    #[serde(default)]
    display_status_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    text: String,
    sent_at: DateTime<Utc>,
    #[serde(default)]
    is_mine: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesPayload {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionPayload {
    counterparty_user_id: String,
}

#[derive(Debug, Deserialize)]
struct ContactsPayload {
    #[serde(default)]
    contacts: Vec<PurchasedContact>,
}

#[derive(Debug, Deserialize)]
struct NegotiationsPayload {
    #[serde(default)]
    negotiations: Vec<NegotiationSummary>,
}

/// Decode a `{ success, error?, ...payload }` envelope.
///
/// `success: false` becomes `Rejected` with the server's error text; a missing
/// `success` flag counts as success.
pub(crate) fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let value: Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(ExchangeError::Malformed("response is not a JSON object".to_string()));
    }

    let success = value.get("success").and_then(Value::as_bool).unwrap_or(true);
    if !success {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        return Err(ExchangeError::Rejected(message));
    }

    Ok(serde_json::from_value(value)?)
}

fn decode_proposals(body: &str) -> Result<ProposalsSnapshot> {
    let payload: ProposalsPayload = decode_envelope(body)?;
    let proposals = payload
        .proposals
        .into_iter()
        .map(Proposal::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(ProposalsSnapshot {
        proposals,
        current_meeting: payload.current_meeting.map(CurrentMeeting::from),
        display_status_hint: payload.display_status_hint,
    })
}

fn decode_messages(body: &str) -> Result<Vec<ChatMessage>> {
    let payload: MessagesPayload = decode_envelope(body)?;
    Ok(payload
        .messages
        .into_iter()
        .map(|m| ChatMessage::from_server(&m.id, &m.text, m.sent_at, m.is_mine))
        .collect())
}

fn proposal_fields(value: &ProposedValue) -> Value {
    match value {
        ProposedValue::Time(at) => json!({
            "type": "time",
            "proposedTime": at.to_rfc3339(),
        }),
        ProposedValue::Location(location) => json!({
            "type": "location",
            "locationName": location.name,
            "latitude": location.latitude,
            "longitude": location.longitude,
        }),
    }
}

/// reqwest-backed `ExchangeApi`
pub struct HttpExchangeApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExchangeApi {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(HttpExchangeApi {
            http,
            base_url: config.base_url.clone(),
        })
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/api/{}", self.base_url, operation)
    }

    /// POST the body and return the raw response text of a successful call
    async fn post(&self, operation: &str, token: &str, mut body: Value) -> Result<String> {
        if let Some(map) = body.as_object_mut() {
            map.insert("sessionToken".to_string(), Value::String(token.to_string()));
        }

        debug!("Dispatching {}", operation);
        let response = self.http.post(self.endpoint(operation)).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(text);
        }

        Err(failure(operation, status, &text))
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, token: &str, body: Value) -> Result<T> {
        let text = self.post(operation, token, body).await?;
        decode_envelope(&text).map_err(|e| log_decode_failure(operation, e))
    }
}

/// Classify a non-success HTTP response
fn failure(operation: &str, status: StatusCode, body: &str) -> ExchangeError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!("{} refused the session token ({})", operation, status);
        return ExchangeError::SessionInvalid(status.as_u16());
    }

    // Business errors are sometimes reported with a 4xx and an envelope body
    if status.is_client_error() {
        if let Err(ExchangeError::Rejected(message)) = decode_envelope::<IgnoredAny>(body) {
            warn!("{} rejected: {}", operation, message);
            return ExchangeError::Rejected(message);
        }
    }

    error!("{} failed with HTTP {}", operation, status);
    ExchangeError::Network(format!("{} returned HTTP {}", operation, status))
}

fn log_decode_failure(operation: &str, e: ExchangeError) -> ExchangeError {
    match &e {
        ExchangeError::Rejected(message) => warn!("{} rejected: {}", operation, message),
        other => error!("{} returned an unusable response: {}", operation, other),
    }
    e
}

#[async_trait]
impl ExchangeApi for HttpExchangeApi {
    async fn get_meeting_proposals(&self, token: &str, listing_id: &str) -> Result<ProposalsSnapshot> {
        let text = self
            .post("GetMeetingProposals", token, json!({ "listingId": listing_id }))
            .await?;
        decode_proposals(&text).map_err(|e| log_decode_failure("GetMeetingProposals", e))
    }

    async fn propose_meeting(
        &self,
        token: &str,
        listing_id: &str,
        value: &ProposedValue,
        message: Option<&str>,
    ) -> Result<()> {
        let mut body = proposal_fields(value);
        if let Some(map) = body.as_object_mut() {
            map.insert("listingId".to_string(), json!(listing_id));
            map.insert("message".to_string(), json!(message));
        }
        self.call::<IgnoredAny>("ProposeMeeting", token, body).await?;
        info!("Proposed {:?} for listing {}", value.kind(), listing_id);
        Ok(())
    }

    async fn respond_to_meeting(
        &self,
        token: &str,
        proposal_id: &str,
        response: MeetingResponse,
    ) -> Result<()> {
        self.call::<IgnoredAny>(
            "RespondToMeeting",
            token,
            json!({ "proposalId": proposal_id, "response": response.as_str() }),
        )
        .await?;
        info!("Responded {} to proposal {}", response.as_str(), proposal_id);
        Ok(())
    }

    async fn get_contact_messages(&self, token: &str, listing_id: &str) -> Result<Vec<ChatMessage>> {
        let text = self
            .post("GetContactMessages", token, json!({ "listingId": listing_id }))
            .await?;
        decode_messages(&text).map_err(|e| log_decode_failure("GetContactMessages", e))
    }

    async fn send_contact_message(&self, token: &str, listing_id: &str, text: &str) -> Result<()> {
        self.call::<IgnoredAny>(
            "SendContactMessage",
            token,
            json!({ "listingId": listing_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn process_payment(&self, token: &str, listing_id: &str) -> Result<()> {
        self.call::<IgnoredAny>("ProcessPayment", token, json!({ "listingId": listing_id }))
            .await?;
        info!("Payment processed for listing {}", listing_id);
        Ok(())
    }

    async fn complete_exchange(&self, token: &str, listing_id: &str) -> Result<String> {
        let payload: CompletionPayload = self
            .call("CompleteExchange", token, json!({ "listingId": listing_id }))
            .await?;
        Ok(payload.counterparty_user_id)
    }

    async fn submit_rating(
        &self,
        token: &str,
        listing_id: &str,
        rated_user_id: &str,
        stars: u8,
        comment: Option<&str>,
    ) -> Result<()> {
        self.call::<IgnoredAny>(
            "SubmitRating",
            token,
            json!({
                "listingId": listing_id,
                "ratedUserId": rated_user_id,
                "stars": stars,
                "comment": comment,
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_dashboard_summary(&self, token: &str) -> Result<DashboardSummary> {
        self.call("GetDashboardSummary", token, json!({})).await
    }

    async fn get_purchased_contacts(&self, token: &str) -> Result<Vec<PurchasedContact>> {
        let payload: ContactsPayload = self.call("GetPurchasedContacts", token, json!({})).await?;
        Ok(payload.contacts)
    }

    async fn get_negotiations(&self, token: &str) -> Result<Vec<NegotiationSummary>> {
        let payload: NegotiationsPayload = self.call("GetNegotiations", token, json!({})).await?;
        Ok(payload.negotiations)
    }
}
