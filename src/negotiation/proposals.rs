//! Proposal store and meeting aggregation.
//!
//! Time and location are negotiated as two independent proposal streams. For each
//! kind one proposal is *authoritative*:
//!
//! - the newest `accepted` proposal, if any;
//! - otherwise the newest `pending` proposal;
//! - otherwise nothing (`rejected` / `expired` proposals never count).
//!
//! An accepted proposal is never displaced by a later pending one of the same kind.
//! Such a counter-proposal is kept aside until it is itself accepted, at which
//! point it is the newest accepted proposal and takes over.
//!
//! "Newest" orders by `created_at` when both proposals carry one; when timestamps
//! tie or either is missing, the later position in the server list is newer.

use chrono::{DateTime, Utc};

use crate::models::{MeetingLocation, Proposal, ProposalKind, ProposalStatus, ProposedValue};
use super::action::{resolve, ActionLabel};

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedTime {
    pub proposal_id: String,
    pub at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedLocation {
    pub proposal_id: String,
    pub location: MeetingLocation,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedMeeting {
    pub time: AcceptedTime,
    pub location: AcceptedLocation,
    pub agreed_at: Option<DateTime<Utc>>,
    pub self_paid_at: Option<DateTime<Utc>>,
    pub counterparty_paid_at: Option<DateTime<Utc>>,
}

/// Derived meeting state. Never stored, always recomputed from the proposal store.
#[derive(Debug, Clone, PartialEq)]
pub enum MeetingState {
    Unset,
    TimeOnly(AcceptedTime),
    LocationOnly(AcceptedLocation),
    Confirmed(ConfirmedMeeting),
}

impl MeetingState {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, MeetingState::Confirmed(_))
    }

    pub fn accepted_time(&self) -> Option<&AcceptedTime> {
        match self {
            MeetingState::TimeOnly(time) => Some(time),
            MeetingState::Confirmed(meeting) => Some(&meeting.time),
            _ => None,
        }
    }

    pub fn accepted_location(&self) -> Option<&AcceptedLocation> {
        match self {
            MeetingState::LocationOnly(location) => Some(location),
            MeetingState::Confirmed(meeting) => Some(&meeting.location),
            _ => None,
        }
    }

    /// Attach server-confirmed payment timestamps; only a confirmed meeting carries them.
    pub fn with_payments(
        self,
        self_paid_at: Option<DateTime<Utc>>,
        counterparty_paid_at: Option<DateTime<Utc>>,
    ) -> Self {
        match self {
            MeetingState::Confirmed(meeting) => MeetingState::Confirmed(ConfirmedMeeting {
                self_paid_at,
                counterparty_paid_at,
                ..meeting
            }),
            other => other,
        }
    }

    /// Time left until the confirmed meeting, or `None` if not confirmed or already past.
    pub fn time_until(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match self {
            MeetingState::Confirmed(meeting) if meeting.time.at > now => Some(meeting.time.at - now),
            _ => None,
        }
    }
}

/// How one kind of proposal stands after aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum Standing {
    Absent,
    Pending(Proposal),
    Accepted {
        proposal: Proposal,
        counter: Option<Proposal>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub state: MeetingState,
    pub time: Standing,
    pub location: Standing,
}

impl Aggregate {
    pub fn pending_time(&self) -> Option<&Proposal> {
        match &self.time {
            Standing::Pending(p) => Some(p),
            _ => None,
        }
    }

    pub fn pending_location(&self) -> Option<&Proposal> {
        match &self.location {
            Standing::Pending(p) => Some(p),
            _ => None,
        }
    }

    /// A pending time proposal made after a time was already accepted
    pub fn counter_time(&self) -> Option<&Proposal> {
        match &self.time {
            Standing::Accepted { counter, .. } => counter.as_ref(),
            _ => None,
        }
    }

    pub fn counter_location(&self) -> Option<&Proposal> {
        match &self.location {
            Standing::Accepted { counter, .. } => counter.as_ref(),
            _ => None,
        }
    }

    pub fn action_label(&self) -> ActionLabel {
        resolve(&self.state, self.pending_time(), self.pending_location())
    }
}

/// Where a proposal sits in time: its timestamp and its position in the server list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Recency {
    created_at: Option<DateTime<Utc>>,
    position: usize,
}

impl Recency {
    fn of(position: usize, proposal: &Proposal) -> Self {
        Recency {
            created_at: proposal.created_at,
            position,
        }
    }

    /// Timestamps decide when both are present and differ; otherwise the later position wins
    fn is_newer_than(&self, other: &Recency) -> bool {
        match (self.created_at, other.created_at) {
            (Some(a), Some(b)) if a != b => a > b,
            _ => self.position > other.position,
        }
    }
}

fn newest<'a>(
    candidates: &[(Recency, &'a Proposal)],
    status: ProposalStatus,
    after: Option<Recency>,
) -> Option<(Recency, &'a Proposal)> {
    candidates
        .iter()
        .filter(|(key, p)| p.status == status && after.map_or(true, |a| key.is_newer_than(&a)))
        .fold(None, |best: Option<(Recency, &'a Proposal)>, &(key, p)| match best {
            Some((best_key, _)) if !key.is_newer_than(&best_key) => best,
            _ => Some((key, p)),
        })
}

fn standing(proposals: &[Proposal], kind: ProposalKind) -> Standing {
    let candidates: Vec<(Recency, &Proposal)> = proposals
        .iter()
        .enumerate()
        .filter(|(_, p)| p.kind() == kind)
        .map(|(index, p)| (Recency::of(index, p), p))
        .collect();

    if let Some((key, accepted)) = newest(&candidates, ProposalStatus::Accepted, None) {
        let counter = newest(&candidates, ProposalStatus::Pending, Some(key)).map(|(_, p)| p.clone());
        return Standing::Accepted {
            proposal: accepted.clone(),
            counter,
        };
    }

    match newest(&candidates, ProposalStatus::Pending, None) {
        Some((_, pending)) => Standing::Pending(pending.clone()),
        None => Standing::Absent,
    }
}

fn accepted_time(standing: &Standing) -> Option<AcceptedTime> {
    match standing {
        Standing::Accepted { proposal, .. } => match &proposal.value {
            ProposedValue::Time(at) => Some(AcceptedTime {
                proposal_id: proposal.id.clone(),
                at: *at,
                accepted_at: proposal.responded_at,
            }),
            ProposedValue::Location(_) => None,
        },
        _ => None,
    }
}

fn accepted_location(standing: &Standing) -> Option<AcceptedLocation> {
    match standing {
        Standing::Accepted { proposal, .. } => match &proposal.value {
            ProposedValue::Location(location) => Some(AcceptedLocation {
                proposal_id: proposal.id.clone(),
                location: location.clone(),
                accepted_at: proposal.responded_at,
            }),
            ProposedValue::Time(_) => None,
        },
        _ => None,
    }
}

/// Aggregate a full proposal list into a meeting state plus per-kind standings.
/// Pure and total: any list, including an empty one, yields a state.
pub fn ingest(proposals: &[Proposal]) -> Aggregate {
    let time = standing(proposals, ProposalKind::Time);
    let location = standing(proposals, ProposalKind::Location);

    let state = match (accepted_time(&time), accepted_location(&location)) {
        (Some(time), Some(location)) => {
            let agreed_at = time.accepted_at.max(location.accepted_at);
            MeetingState::Confirmed(ConfirmedMeeting {
                time,
                location,
                agreed_at,
                self_paid_at: None,
                counterparty_paid_at: None,
            })
        }
        (Some(time), None) => MeetingState::TimeOnly(time),
        (None, Some(location)) => MeetingState::LocationOnly(location),
        (None, None) => MeetingState::Unset,
    };

    Aggregate { state, time, location }
}

/// Proposal history for one listing, replaced wholesale on every applied fetch
#[derive(Debug, Clone, Default)]
pub struct ProposalStore {
    proposals: Vec<Proposal>,
    display_status_hint: Option<String>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, proposals: Vec<Proposal>, display_status_hint: Option<String>) {
        self.proposals = proposals;
        self.display_status_hint = display_status_hint;
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn get(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == proposal_id)
    }

    /// All proposals of one kind, oldest first. Server order is kept when any
    /// proposal of that kind lacks a timestamp.
    pub fn history(&self, kind: ProposalKind) -> Vec<&Proposal> {
        let mut history: Vec<&Proposal> = self.proposals.iter().filter(|p| p.kind() == kind).collect();
        if history.iter().all(|p| p.created_at.is_some()) {
            history.sort_by_key(|p| p.created_at);
        }
        history
    }

    /// Server hint for display only; never used to derive state
    pub fn display_status_hint(&self) -> Option<&str> {
        self.display_status_hint.as_deref()
    }

    pub fn aggregate(&self) -> Aggregate {
        ingest(&self.proposals)
    }
}
