// Negotiation session for one listing
// Owns the proposal store, message channel and payment gate, and the timers that refresh them

use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

pub mod action;
pub mod messages;
pub mod payment;
pub mod proposals;
pub mod sync;

pub use action::{resolve, ActionLabel, Actor};
pub use messages::MessageChannel;
pub use payment::{PaymentGate, PaymentState, Rating, RatingPrompt};
pub use proposals::{ingest, Aggregate, MeetingState, ProposalStore, Standing};
pub use sync::{LoadOutcome, PollTick, Poller, RequestGeneration, RequestToken};

use crate::api::{ExchangeApi, MeetingResponse};
use crate::collaborators::PlaceSearch;
use crate::config::SessionConfig;
use crate::error::{ExchangeError, Result};
use crate::models::{ChatMessage, DeliveryStatus, MeetingLocation, Proposal, ProposalStatus, ProposedValue};

/// Notifications for whatever renders the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MeetingChanged { state: MeetingState, label: ActionLabel },
    MessagesChanged(Vec<ChatMessage>),
    DeliveryStatusChanged { id: String, status: DeliveryStatus },
    PaymentChanged(PaymentState),
    Banner(String),
    Countdown(Duration),
    Finished,
}

struct SessionState {
    store: ProposalStore,
    aggregate: Aggregate,
    meeting: MeetingState,
    label: ActionLabel,
    channel: MessageChannel,
    gate: PaymentGate,
}

impl SessionState {
    fn new() -> Self {
        let store = ProposalStore::new();
        let aggregate = store.aggregate();
        SessionState {
            meeting: aggregate.state.clone(),
            label: aggregate.action_label(),
            aggregate,
            store,
            channel: MessageChannel::new(),
            gate: PaymentGate::new(),
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    api: Arc<dyn ExchangeApi>,
    listing_id: String,
    generation: RequestGeneration,
    state: TokioMutex<SessionState>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // Never block on a slow consumer
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropped session event for listing {}: {}", self.listing_id, e);
        }
    }

    /// Report a failed user action on the banner and hand the error back
    fn surface(&self, action: &str, e: ExchangeError) -> ExchangeError {
        warn!("{} failed for listing {}: {}", action, self.listing_id, e);
        self.emit(SessionEvent::Banner(format!("{} failed: {}", action, e)));
        e
    }

    /// Recompute derived state from the store and payments, emitting on change
    fn recompute(&self, state: &mut SessionState) {
        let aggregate = state.store.aggregate();
        let payments = state.gate.state();
        let meeting = aggregate
            .state
            .clone()
            .with_payments(payments.self_paid_at, payments.counterparty_paid_at);
        let label = aggregate.action_label();
        state.aggregate = aggregate;

        if meeting != state.meeting || label != state.label {
            info!("Listing {} meeting is now {}", self.listing_id, label);
            state.meeting = meeting.clone();
            state.label = label;
            self.emit(SessionEvent::MeetingChanged { state: meeting, label });
        }
    }

    /// One load cycle: fetch proposals and messages concurrently, join, then apply
    /// each part only if `token` is still current.
    async fn load(&self, token: RequestToken) -> Result<LoadOutcome> {
        let auth = self.config.token()?;
        let (proposals, messages) = futures::join!(
            self.api.get_meeting_proposals(auth, &self.listing_id),
            self.api.get_contact_messages(auth, &self.listing_id),
        );

        for error in [proposals.as_ref().err(), messages.as_ref().err()].into_iter().flatten() {
            if error.is_session_error() {
                return Err(self.surface("Loading", error.clone()));
            }
        }

        let mut state = self.state.lock().await;
        if !self.generation.is_current(token) {
            debug!(
                "Discarding stale load {} for listing {}",
                token.generation(),
                self.listing_id
            );
            return Ok(LoadOutcome::Discarded);
        }

        match proposals {
            Ok(snapshot) => {
                let payments = PaymentState::from_meeting(snapshot.current_meeting.as_ref());
                state.store.replace(snapshot.proposals, snapshot.display_status_hint);
                if state.gate.refresh(payments) {
                    self.emit(SessionEvent::PaymentChanged(state.gate.state().clone()));
                }
                self.recompute(&mut state);
            }
            Err(e) => warn!("Keeping last proposals for listing {}: {}", self.listing_id, e),
        }

        match messages {
            Ok(fetched) => {
                state.channel.replace_with_server(fetched);
                self.emit(SessionEvent::MessagesChanged(state.channel.messages().to_vec()));
            }
            Err(e) => warn!("Keeping last messages for listing {}: {}", self.listing_id, e),
        }

        Ok(LoadOutcome::Applied)
    }

    async fn refresh_messages(&self, token: RequestToken) -> Result<LoadOutcome> {
        let auth = self.config.token()?;
        let fetched = self.api.get_contact_messages(auth, &self.listing_id).await?;

        let mut state = self.state.lock().await;
        if !self.generation.is_current(token) {
            debug!("Discarding stale message refresh for listing {}", self.listing_id);
            return Ok(LoadOutcome::Discarded);
        }
        state.channel.replace_with_server(fetched);
        self.emit(SessionEvent::MessagesChanged(state.channel.messages().to_vec()));
        Ok(LoadOutcome::Applied)
    }

    async fn reload(&self) -> Result<LoadOutcome> {
        let token = self.generation.mint();
        self.load(token).await
    }

    async fn set_delivery(&self, local_id: &str, status: DeliveryStatus) {
        let mut state = self.state.lock().await;
        if state.channel.advance(local_id, status) {
            self.emit(SessionEvent::DeliveryStatusChanged {
                id: local_id.to_string(),
                status,
            });
            self.emit(SessionEvent::MessagesChanged(state.channel.messages().to_vec()));
        }
    }

    /// Network half of an optimistic send
    async fn deliver(&self, local_id: &str, text: &str) -> DeliveryStatus {
        let sent = match self.config.token() {
            Ok(auth) => self.api.send_contact_message(auth, &self.listing_id, text).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                info!("Message {} accepted by server", local_id);
                self.set_delivery(local_id, DeliveryStatus::Sent).await;

                tokio::time::sleep(self.config.refetch_delay()).await;
                let token = self.generation.current();
                if let Err(e) = self.refresh_messages(token).await {
                    warn!("Message refresh after send failed: {}", e);
                }
                DeliveryStatus::Sent
            }
            Err(e) => {
                warn!("Failed to send message {}: {}", local_id, e);
                self.set_delivery(local_id, DeliveryStatus::Failed).await;
                DeliveryStatus::Failed
            }
        }
    }

    async fn emit_countdown(&self) {
        let remaining = {
            let state = self.state.lock().await;
            state.meeting.time_until(Utc::now())
        };
        if let Some(remaining) = remaining.and_then(|r| r.to_std().ok()) {
            self.emit(SessionEvent::Countdown(remaining));
        }
    }
}

/// An optimistic send in flight. Dropping it does not cancel the send.
pub struct PendingSend {
    pub local_id: String,
    task: JoinHandle<DeliveryStatus>,
}

impl PendingSend {
    /// Wait for the send and its follow-up refresh to finish
    pub async fn settled(self) -> DeliveryStatus {
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                warn!("Send task for {} did not finish: {}", self.local_id, e);
                DeliveryStatus::Failed
            }
        }
    }
}

fn validate_location(location: &MeetingLocation) -> Result<MeetingLocation> {
    let name = location.name.trim();
    if name.is_empty() {
        return Err(ExchangeError::InvalidInput("location name is empty".to_string()));
    }
    match (location.latitude, location.longitude) {
        (None, None) => Ok(MeetingLocation::named(name)),
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(ExchangeError::InvalidInput(format!(
                    "coordinates out of range: {}, {}",
                    lat, lon
                )));
            }
            Ok(MeetingLocation::with_coordinates(name, lat, lon))
        }
        _ => Err(ExchangeError::InvalidInput(
            "latitude and longitude must be given together".to_string(),
        )),
    }
}

/// Negotiation state for one listing's detail view.
///
/// Created when the view opens (followed by a full `reload`) and dropped when the
/// user leaves; dropping cancels the polling and countdown timers.
pub struct NegotiationSession {
    inner: Arc<SessionInner>,
    poller: Poller,
    countdown: Poller,
}

impl NegotiationSession {
    pub fn new(
        config: SessionConfig,
        api: Arc<dyn ExchangeApi>,
        listing_id: &str,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let inner = Arc::new(SessionInner {
            config,
            api,
            listing_id: listing_id.to_string(),
            generation: RequestGeneration::new(),
            state: TokioMutex::new(SessionState::new()),
            events,
        });

        (
            NegotiationSession {
                inner,
                poller: Poller::new("meeting"),
                countdown: Poller::new("countdown"),
            },
            event_rx,
        )
    }

    pub fn listing_id(&self) -> &str {
        &self.inner.listing_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ---- loading --------------------------------------------------------

    /// Manual refresh: mints a new request token, so older in-flight loads are discarded
    pub async fn reload(&self) -> Result<LoadOutcome> {
        self.inner.reload().await
    }

    /// Routine poll: reuses the current token
    pub async fn poll_once(&self) -> Result<LoadOutcome> {
        let token = self.inner.generation.current();
        self.inner.load(token).await
    }

    pub fn current_token(&self) -> RequestToken {
        self.inner.generation.current()
    }

    // ---- derived state --------------------------------------------------

    pub async fn meeting_state(&self) -> MeetingState {
        self.inner.state.lock().await.meeting.clone()
    }

    pub async fn action_label(&self) -> ActionLabel {
        self.inner.state.lock().await.label
    }

    pub async fn aggregate(&self) -> Aggregate {
        self.inner.state.lock().await.aggregate.clone()
    }

    pub async fn proposals(&self) -> Vec<Proposal> {
        self.inner.state.lock().await.store.proposals().to_vec()
    }

    pub async fn display_status_hint(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .store
            .display_status_hint()
            .map(str::to_string)
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().await.channel.messages().to_vec()
    }

    pub async fn delivery_status(&self, local_id: &str) -> Option<DeliveryStatus> {
        self.inner.state.lock().await.channel.status_of(local_id)
    }

    pub async fn payment_state(&self) -> PaymentState {
        self.inner.state.lock().await.gate.state().clone()
    }

    // ---- proposals ------------------------------------------------------

    pub async fn propose_time(&self, at: DateTime<Utc>, message: Option<&str>) -> Result<()> {
        self.propose(ProposedValue::Time(at), message).await
    }

    pub async fn propose_location(&self, location: MeetingLocation, message: Option<&str>) -> Result<()> {
        let location = validate_location(&location)?;
        self.propose(ProposedValue::Location(location), message).await
    }

    /// Propose the `index`-th result of a place search
    pub async fn propose_location_from_search(
        &self,
        search: &dyn PlaceSearch,
        query: &str,
        index: usize,
        message: Option<&str>,
    ) -> Result<MeetingLocation> {
        let results = search.search(query).await?;
        debug!("Place search for '{}' returned {} results", query, results.len());
        let chosen = results.get(index).cloned().ok_or_else(|| {
            ExchangeError::InvalidInput(format!(
                "no search result {} for '{}' ({} found)",
                index,
                query,
                results.len()
            ))
        })?;
        self.propose_location(chosen.clone(), message).await?;
        Ok(chosen)
    }

    async fn propose(&self, value: ProposedValue, message: Option<&str>) -> Result<()> {
        let auth = self.inner.config.token()?;
        let message = message.map(str::trim).filter(|m| !m.is_empty());

        info!("Proposing {:?} for listing {}", value.kind(), self.inner.listing_id);
        if let Err(e) = self
            .inner
            .api
            .propose_meeting(auth, &self.inner.listing_id, &value, message)
            .await
        {
            return Err(self.inner.surface("Proposal", e));
        }

        self.inner.reload().await?;
        Ok(())
    }

    /// Accept or reject a counterparty proposal.
    ///
    /// Unknown, already answered and self-authored proposals are refused before
    /// any request is made.
    pub async fn respond(&self, proposal_id: &str, response: MeetingResponse) -> Result<()> {
        let auth = self.inner.config.token()?;
        {
            let state = self.inner.state.lock().await;
            let refuse = |reason: &str| ExchangeError::NotRespondable {
                proposal_id: proposal_id.to_string(),
                reason: reason.to_string(),
            };
            let proposal = state
                .store
                .get(proposal_id)
                .ok_or_else(|| refuse("unknown proposal"))?;
            if proposal.status != ProposalStatus::Pending {
                return Err(refuse(&format!("already {:?}", proposal.status).to_lowercase()));
            }
            if proposal.proposer_is_self {
                return Err(refuse("cannot answer your own proposal"));
            }
        }

        info!("Responding {} to proposal {}", response.as_str(), proposal_id);
        if let Err(e) = self
            .inner
            .api
            .respond_to_meeting(auth, proposal_id, response)
            .await
        {
            return Err(self.inner.surface("Response", e));
        }

        self.inner.reload().await?;
        Ok(())
    }

    // ---- chat -----------------------------------------------------------

    /// Optimistically append `text` and send it in the background.
    ///
    /// The returned handle may be dropped; the send and its follow-up refresh
    /// carry on regardless.
    pub async fn send_message(&self, text: &str) -> Result<PendingSend> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExchangeError::InvalidInput("message is empty".to_string()));
        }
        self.inner.config.token()?;

        let local_id = {
            let mut state = self.inner.state.lock().await;
            let id = state.channel.insert_optimistic(text, Utc::now());
            self.inner
                .emit(SessionEvent::MessagesChanged(state.channel.messages().to_vec()));
            id
        };

        let inner = self.inner.clone();
        let id = local_id.clone();
        let text = text.to_string();
        let task = tokio::spawn(async move { inner.deliver(&id, &text).await });

        Ok(PendingSend { local_id, task })
    }

    // ---- payment and completion -----------------------------------------

    /// Pay our side. Timestamps are taken from the reload that follows, never set locally.
    pub async fn mark_paid(&self) -> Result<()> {
        let auth = self.inner.config.token()?;
        {
            let state = self.inner.state.lock().await;
            PaymentGate::ensure_confirmed(&state.meeting)?;
        }

        info!("Processing payment for listing {}", self.inner.listing_id);
        if let Err(e) = self.inner.api.process_payment(auth, &self.inner.listing_id).await {
            return Err(self.inner.surface("Payment", e));
        }

        self.inner.reload().await?;
        Ok(())
    }

    /// Complete the exchange; refused without a request unless the meeting is confirmed
    pub async fn complete_exchange(&self) -> Result<RatingPrompt> {
        let auth = self.inner.config.token()?;
        {
            let state = self.inner.state.lock().await;
            PaymentGate::ensure_confirmed(&state.meeting)?;
            state.gate.ensure_not_rated()?;
            state.gate.ensure_not_completed()?;
        }

        info!("Completing exchange for listing {}", self.inner.listing_id);
        let counterparty_user_id = match self
            .inner
            .api
            .complete_exchange(auth, &self.inner.listing_id)
            .await
        {
            Ok(id) => id,
            Err(e) => return Err(self.inner.surface("Completion", e)),
        };
        self.inner.state.lock().await.gate.mark_completed();

        if let Err(e) = self.inner.reload().await {
            warn!("Reload after completion failed: {}", e);
        }

        Ok(RatingPrompt {
            listing_id: self.inner.listing_id.clone(),
            counterparty_user_id,
        })
    }

    /// Rate the counterparty. Terminal: stops all timers and emits `Finished`.
    pub async fn submit_rating(&mut self, prompt: &RatingPrompt, rating: Rating) -> Result<()> {
        let auth = self.inner.config.token()?;
        self.inner.state.lock().await.gate.ensure_not_rated()?;

        if let Err(e) = self
            .inner
            .api
            .submit_rating(
                auth,
                &prompt.listing_id,
                &prompt.counterparty_user_id,
                rating.stars(),
                rating.comment(),
            )
            .await
        {
            return Err(self.inner.surface("Rating", e));
        }

        self.inner.state.lock().await.gate.mark_rated();
        info!(
            "Rated {} with {} stars for listing {}",
            prompt.counterparty_user_id,
            rating.stars(),
            prompt.listing_id
        );
        self.close();
        self.inner.emit(SessionEvent::Finished);
        Ok(())
    }

    // ---- timers ---------------------------------------------------------

    /// Poll at the configured chat cadence
    pub fn start_polling(&mut self) -> bool {
        let interval = self.inner.config.chat_poll_interval();
        self.start_polling_every(interval)
    }

    pub fn start_polling_every(&mut self, interval: Duration) -> bool {
        let weak = Arc::downgrade(&self.inner);
        self.poller.start(interval, poll_tick(weak))
    }

    pub fn stop_polling(&mut self) -> bool {
        self.poller.stop()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Emit `Countdown` events until the confirmed meeting time
    pub fn start_countdown(&mut self, every: Duration) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let tick: PollTick = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.emit_countdown().await;
                }
            }
            .boxed()
        });
        self.countdown.start(every, tick)
    }

    pub fn stop_countdown(&mut self) -> bool {
        self.countdown.stop()
    }

    /// Timers only run while the chat or meeting view is on screen
    pub fn set_view_visible(&mut self, visible: bool) {
        self.poller.set_visible(visible);
        self.countdown.set_visible(visible);
    }

    /// Cancel every timer owned by this session
    pub fn close(&mut self) {
        self.poller.stop();
        self.countdown.stop();
    }
}

fn poll_tick(inner: Weak<SessionInner>) -> PollTick {
    Arc::new(move || {
        let inner = inner.clone();
        async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let token = inner.generation.current();
            match inner.load(token).await {
                Ok(LoadOutcome::Applied) => {}
                Ok(LoadOutcome::Discarded) => debug!("Poll result for {} was stale", inner.listing_id),
                Err(e) => warn!("Poll for listing {} failed: {}", inner.listing_id, e),
            }
        }
        .boxed()
    })
}
