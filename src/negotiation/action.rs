// Action resolution: what the meeting needs next, and from whom

use std::fmt::Display;

use crate::models::Proposal;
use super::proposals::MeetingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionLabel {
    Confirmed,
    AwaitingCounterparty,
    AcceptTime,
    AcceptLocation,
    ProposeLocation,
    ProposeTime,
    NoProposalYet,
}

/// Who is expected to act for a given label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Me,
    Counterparty,
    Either,
}

impl ActionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionLabel::Confirmed => "confirmed",
            ActionLabel::AwaitingCounterparty => "awaiting-counterparty",
            ActionLabel::AcceptTime => "action-required-accept-time",
            ActionLabel::AcceptLocation => "action-required-accept-location",
            ActionLabel::ProposeLocation => "action-required-propose-location",
            ActionLabel::ProposeTime => "action-required-propose-time",
            ActionLabel::NoProposalYet => "no-proposal-yet",
        }
    }

    pub fn next_actor(self) -> Option<Actor> {
        match self {
            ActionLabel::Confirmed => None,
            ActionLabel::AwaitingCounterparty => Some(Actor::Counterparty),
            ActionLabel::AcceptTime | ActionLabel::AcceptLocation => Some(Actor::Me),
            ActionLabel::ProposeLocation | ActionLabel::ProposeTime | ActionLabel::NoProposalYet => {
                Some(Actor::Either)
            }
        }
    }

    /// True when the local user has something to do
    pub fn requires_my_action(self) -> bool {
        matches!(self.next_actor(), Some(Actor::Me) | Some(Actor::Either))
    }
}

impl Display for ActionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map a meeting state plus the authoritative pending proposals to one label.
///
/// Rules are checked top to bottom and the first match wins. Pending proposals
/// of a kind that is already accepted are ignored.
///
/// ```text
///  1. time accepted, location accepted          -> confirmed
///  2. time accepted, location pending (theirs)  -> accept-location
///  3. time accepted, location pending (mine)    -> awaiting-counterparty
///  4. time accepted, no location                -> propose-location
///  5. time pending (mine)                       -> awaiting-counterparty
///  6. time pending (theirs)                     -> accept-time
///  7. location accepted, no time                -> propose-time
///  8. no time, location pending (mine)          -> awaiting-counterparty
///  9. no time, location pending (theirs)        -> accept-location
/// 10. nothing                                   -> no-proposal-yet
/// ```
pub fn resolve(
    state: &MeetingState,
    pending_time: Option<&Proposal>,
    pending_location: Option<&Proposal>,
) -> ActionLabel {
    let time_accepted = state.accepted_time().is_some();
    let location_accepted = state.accepted_location().is_some();
    let pending_time = pending_time.filter(|_| !time_accepted);
    let pending_location = pending_location.filter(|_| !location_accepted);

    if time_accepted && location_accepted {
        return ActionLabel::Confirmed;
    }

    if time_accepted {
        return match pending_location {
            Some(p) if !p.proposer_is_self => ActionLabel::AcceptLocation,
            Some(_) => ActionLabel::AwaitingCounterparty,
            None => ActionLabel::ProposeLocation,
        };
    }

    if let Some(p) = pending_time {
        return if p.proposer_is_self {
            ActionLabel::AwaitingCounterparty
        } else {
            ActionLabel::AcceptTime
        };
    }

    if location_accepted {
        return ActionLabel::ProposeTime;
    }

    match pending_location {
        Some(p) if p.proposer_is_self => ActionLabel::AwaitingCounterparty,
        Some(_) => ActionLabel::AcceptLocation,
        None => ActionLabel::NoProposalYet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeetingLocation, ProposalStatus, ProposedValue};
    use crate::negotiation::proposals::ingest;
    use chrono::{TimeZone, Utc};

    #[derive(Debug, Clone, Copy)]
    enum Side {
        None,
        PendingMine,
        PendingTheirs,
        Accepted,
    }

    const SIDES: [Side; 4] = [Side::None, Side::PendingMine, Side::PendingTheirs, Side::Accepted];

    fn proposal(side: Side, value: ProposedValue) -> Option<Proposal> {
        let (status, mine) = match side {
            Side::None => return None,
            Side::PendingMine => (ProposalStatus::Pending, true),
            Side::PendingTheirs => (ProposalStatus::Pending, false),
            Side::Accepted => (ProposalStatus::Accepted, false),
        };
        Some(Proposal {
            id: format!("{:?}-{:?}", value.kind(), side),
            status,
            value,
            proposer_is_self: mine,
            proposer_display_name: String::new(),
            message: None,
            created_at: None,
            responded_at: None,
        })
    }

    fn label_for(time: Side, location: Side) -> ActionLabel {
        let when = Utc.with_ymd_and_hms(2025, 12, 1, 18, 0, 0).unwrap();
        let proposals: Vec<Proposal> = [
            proposal(time, ProposedValue::Time(when)),
            proposal(location, ProposedValue::Location(MeetingLocation::named("Central Library"))),
        ]
        .into_iter()
        .flatten()
        .collect();
        ingest(&proposals).action_label()
    }

    fn expected(time: Side, location: Side) -> ActionLabel {
        use ActionLabel::*;
        match (time, location) {
            (Side::Accepted, Side::Accepted) => Confirmed,
            (Side::Accepted, Side::PendingTheirs) => AcceptLocation,
            (Side::Accepted, Side::PendingMine) => AwaitingCounterparty,
            (Side::Accepted, Side::None) => ProposeLocation,
            (Side::PendingMine, _) => AwaitingCounterparty,
            (Side::PendingTheirs, _) => AcceptTime,
            (Side::None, Side::Accepted) => ProposeTime,
            (Side::None, Side::PendingMine) => AwaitingCounterparty,
            (Side::None, Side::PendingTheirs) => AcceptLocation,
            (Side::None, Side::None) => NoProposalYet,
        }
    }

    #[test]
    fn test_all_sixteen_combinations() {
        let mut seen = 0;
        for time in SIDES {
            for location in SIDES {
                assert_eq!(
                    label_for(time, location),
                    expected(time, location),
                    "time={:?} location={:?}",
                    time,
                    location
                );
                seen += 1;
            }
        }
        assert_eq!(seen, 16);
    }

    #[test]
    fn test_spot_checks_against_rule_text() {
        assert_eq!(label_for(Side::Accepted, Side::None), ActionLabel::ProposeLocation);
        assert_eq!(label_for(Side::PendingMine, Side::PendingTheirs), ActionLabel::AwaitingCounterparty);
        assert_eq!(label_for(Side::PendingTheirs, Side::Accepted), ActionLabel::AcceptTime);
        assert_eq!(label_for(Side::None, Side::Accepted), ActionLabel::ProposeTime);
        assert_eq!(label_for(Side::None, Side::None), ActionLabel::NoProposalYet);
    }

    #[test]
    fn test_pending_of_accepted_kind_is_ignored() {
        let when = Utc.with_ymd_and_hms(2025, 12, 1, 18, 0, 0).unwrap();
        let accepted = proposal(Side::Accepted, ProposedValue::Time(when)).unwrap();
        let stray = proposal(Side::PendingTheirs, ProposedValue::Time(when)).unwrap();
        let state = ingest(&[accepted]).state;
        assert_eq!(resolve(&state, Some(&stray), None), ActionLabel::ProposeLocation);
    }

    #[test]
    fn test_label_strings_and_actors() {
        assert_eq!(ActionLabel::AcceptTime.to_string(), "action-required-accept-time");
        assert_eq!(ActionLabel::Confirmed.next_actor(), None);
        assert_eq!(ActionLabel::AwaitingCounterparty.next_actor(), Some(Actor::Counterparty));
        assert!(ActionLabel::AcceptLocation.requires_my_action());
        assert!(ActionLabel::ProposeTime.requires_my_action());
        assert!(!ActionLabel::AwaitingCounterparty.requires_my_action());
    }
}
