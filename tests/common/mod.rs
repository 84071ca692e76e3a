// Common test utilities for integration tests
// An in-memory ExchangeApi standing in for the marketplace server, plus builders
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use log::LevelFilter;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use swapmeet::api::{CurrentMeeting, ExchangeApi, MeetingResponse, ProposalsSnapshot};
use swapmeet::{
    ChatMessage, DashboardSummary, ExchangeError, MeetingLocation, NegotiationSession,
    NegotiationSummary, Proposal, ProposalStatus, ProposedValue, PurchasedContact, Result,
    SessionConfig, SessionEvent,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub const LISTING: &str = "listing-42";
pub const COUNTERPARTY_ID: &str = "user-bob";
pub const COUNTERPARTY_NAME: &str = "Bob";

pub fn meeting_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 1, 18, 0, 0).unwrap()
}

pub fn library() -> MeetingLocation {
    MeetingLocation::named("Central Library")
}

/// Server-side state the mock answers from
#[derive(Default)]
pub struct ServerState {
    pub proposals: Vec<Proposal>,
    pub meeting: Option<CurrentMeeting>,
    pub display_status_hint: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub ratings: Vec<(String, u8, Option<String>)>,
    pub summary: DashboardSummary,
    pub contacts: Vec<PurchasedContact>,
    pub negotiations: Vec<NegotiationSummary>,
    pub fail: HashMap<&'static str, ExchangeError>,
    pub reject_next: Option<String>,
    next_id: u64,
    ticks: i64,
}

impl ServerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    // Server clock: every write happens one minute after the previous one
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        Utc.with_ymd_and_hms(2025, 11, 20, 9, 0, 0).unwrap() + ChronoDuration::minutes(self.ticks)
    }

    fn sync_meeting(&mut self) {
        let newest_accepted = |proposals: &[Proposal], want_time: bool| {
            proposals
                .iter()
                .filter(|p| p.status == ProposalStatus::Accepted)
                .filter(|p| matches!(p.value, ProposedValue::Time(_)) == want_time)
                .max_by_key(|p| p.created_at)
                .cloned()
        };
        let time = newest_accepted(self.proposals.as_slice(), true);
        let location = newest_accepted(self.proposals.as_slice(), false);
        if time.is_none() && location.is_none() {
            return;
        }

        let meeting = self.meeting.get_or_insert_with(CurrentMeeting::default);
        if let Some(ProposedValue::Time(at)) = time.as_ref().map(|p| &p.value) {
            meeting.time = Some(*at);
        }
        if let Some(ProposedValue::Location(place)) = location.as_ref().map(|p| &p.value) {
            meeting.location = Some(place.clone());
        }
        if let (Some(t), Some(l)) = (time, location) {
            meeting.agreed_at = t.responded_at.max(l.responded_at);
        }
    }
}

/// Records every call and answers from `ServerState`
#[derive(Default)]
pub struct MockExchangeApi {
    pub state: Mutex<ServerState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    proposal_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
}

impl MockExchangeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Every call after this one to `operation` fails with `error`
    pub fn fail(&self, operation: &'static str, error: ExchangeError) {
        self.state.lock().unwrap().fail.insert(operation, error);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().fail.remove(operation);
    }

    /// The next mutating call is refused as a business error
    pub fn reject_next(&self, reason: &str) {
        self.state.lock().unwrap().reject_next = Some(reason.to_string());
    }

    /// Hold the next proposals fetch after it has read server state, until the sender fires
    pub fn gate_next_proposals_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.proposal_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn counterparty_proposes(&self, value: ProposedValue) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("prop");
        let created_at = state.now();
        state.proposals.push(proposal(&id, value, false, ProposalStatus::Pending, created_at));
        id
    }

    /// The counterparty answers one of our proposals
    pub fn counterparty_responds(&self, proposal_id: &str, accept: bool) {
        let mut state = self.state.lock().unwrap();
        let now = state.now();
        if let Some(p) = state.proposals.iter_mut().find(|p| p.id == proposal_id) {
            p.status = if accept { ProposalStatus::Accepted } else { ProposalStatus::Rejected };
            p.responded_at = Some(now);
        }
        state.sync_meeting();
    }

    pub fn counterparty_says(&self, text: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("srv");
        let sent_at = state.now();
        state.messages.push(ChatMessage::from_server(&id, text, sent_at, false));
    }

    pub fn counterparty_pays(&self) {
        let mut state = self.state.lock().unwrap();
        let now = state.now();
        state.meeting.get_or_insert_with(CurrentMeeting::default).counterparty_paid_at = Some(now);
    }

    pub fn own_proposals(&self) -> Vec<Proposal> {
        self.state
            .lock()
            .unwrap()
            .proposals
            .iter()
            .filter(|p| p.proposer_is_self)
            .cloned()
            .collect()
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        match self.state.lock().unwrap().fail.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record_write(&self, operation: &'static str) -> Result<()> {
        self.record(operation)?;
        match self.state.lock().unwrap().reject_next.take() {
            Some(reason) => Err(ExchangeError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

pub fn proposal(
    id: &str,
    value: ProposedValue,
    mine: bool,
    status: ProposalStatus,
    created_at: DateTime<Utc>,
) -> Proposal {
    Proposal {
        id: id.to_string(),
        status,
        value,
        proposer_is_self: mine,
        proposer_display_name: if mine { "Me".to_string() } else { COUNTERPARTY_NAME.to_string() },
        message: None,
        created_at: Some(created_at),
        responded_at: None,
    }
}

#[async_trait]
impl ExchangeApi for MockExchangeApi {
    async fn get_meeting_proposals(&self, _token: &str, _listing_id: &str) -> Result<ProposalsSnapshot> {
        self.record("GetMeetingProposals")?;
        let snapshot = {
            let state = self.state.lock().unwrap();
            ProposalsSnapshot {
                proposals: state.proposals.clone(),
                current_meeting: state.meeting.clone(),
                display_status_hint: state.display_status_hint.clone(),
            }
        };
        let gate = self.proposal_gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(snapshot)
    }

    async fn propose_meeting(
        &self,
        _token: &str,
        _listing_id: &str,
        value: &ProposedValue,
        message: Option<&str>,
    ) -> Result<()> {
        self.record_write("ProposeMeeting")?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("prop");
        let created_at = state.now();
        let mut p = proposal(&id, value.clone(), true, ProposalStatus::Pending, created_at);
        p.message = message.map(str::to_string);
        state.proposals.push(p);
        Ok(())
    }

    async fn respond_to_meeting(
        &self,
        _token: &str,
        proposal_id: &str,
        response: MeetingResponse,
    ) -> Result<()> {
        self.record_write("RespondToMeeting")?;
        let mut state = self.state.lock().unwrap();
        let now = state.now();
        let p = state
            .proposals
            .iter_mut()
            .find(|p| p.id == proposal_id)
            .ok_or_else(|| ExchangeError::Rejected("proposal not found".to_string()))?;
        if p.status != ProposalStatus::Pending {
            return Err(ExchangeError::Rejected("proposal already responded to".to_string()));
        }
        p.status = match response {
            MeetingResponse::Accepted => ProposalStatus::Accepted,
            MeetingResponse::Rejected => ProposalStatus::Rejected,
        };
        p.responded_at = Some(now);
        state.sync_meeting();
        Ok(())
    }

    async fn get_contact_messages(&self, _token: &str, _listing_id: &str) -> Result<Vec<ChatMessage>> {
        self.record("GetContactMessages")?;
        Ok(self.state.lock().unwrap().messages.clone())
    }

    async fn send_contact_message(&self, _token: &str, _listing_id: &str, text: &str) -> Result<()> {
        self.record_write("SendContactMessage")?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("srv");
        // Stored on arrival, so never earlier than the client's optimistic copy
        state.messages.push(ChatMessage::from_server(&id, text, Utc::now(), true));
        Ok(())
    }

    async fn process_payment(&self, _token: &str, _listing_id: &str) -> Result<()> {
        self.record_write("ProcessPayment")?;
        let mut state = self.state.lock().unwrap();
        let now = state.now();
        state.meeting.get_or_insert_with(CurrentMeeting::default).self_paid_at = Some(now);
        Ok(())
    }

    async fn complete_exchange(&self, _token: &str, _listing_id: &str) -> Result<String> {
        self.record_write("CompleteExchange")?;
        let mut state = self.state.lock().unwrap();
        let now = state.now();
        state.meeting.get_or_insert_with(CurrentMeeting::default).completed_at = Some(now);
        Ok(COUNTERPARTY_ID.to_string())
    }

    async fn submit_rating(
        &self,
        _token: &str,
        _listing_id: &str,
        rated_user_id: &str,
        stars: u8,
        comment: Option<&str>,
    ) -> Result<()> {
        self.record_write("SubmitRating")?;
        self.state.lock().unwrap().ratings.push((
            rated_user_id.to_string(),
            stars,
            comment.map(str::to_string),
        ));
        Ok(())
    }

    async fn get_dashboard_summary(&self, _token: &str) -> Result<DashboardSummary> {
        self.record("GetDashboardSummary")?;
        Ok(self.state.lock().unwrap().summary.clone())
    }

    async fn get_purchased_contacts(&self, _token: &str) -> Result<Vec<PurchasedContact>> {
        self.record("GetPurchasedContacts")?;
        Ok(self.state.lock().unwrap().contacts.clone())
    }

    async fn get_negotiations(&self, _token: &str) -> Result<Vec<NegotiationSummary>> {
        self.record("GetNegotiations")?;
        Ok(self.state.lock().unwrap().negotiations.clone())
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig::new("http://mock.invalid")
        .with_token("test-token")
        .with_refetch_delay(Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(25))
}

pub fn session_for(api: &Arc<MockExchangeApi>) -> (NegotiationSession, mpsc::Receiver<SessionEvent>) {
    let api: Arc<dyn ExchangeApi> = api.clone();
    NegotiationSession::new(test_config(), api, LISTING)
}

/// Everything currently buffered on the event channel
pub fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
