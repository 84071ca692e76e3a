// Payment and completion gate
//
// Payment timestamps only ever come from server state; nothing here is optimistic.

use chrono::{DateTime, Utc};

use crate::api::CurrentMeeting;
use crate::collaborators::CurrencyConverter;
use crate::error::{ExchangeError, Result};
use super::proposals::MeetingState;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentState {
    pub self_paid_at: Option<DateTime<Utc>>,
    pub counterparty_paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentState {
    pub fn from_meeting(meeting: Option<&CurrentMeeting>) -> Self {
        match meeting {
            Some(m) => PaymentState {
                self_paid_at: m.self_paid_at,
                counterparty_paid_at: m.counterparty_paid_at,
                completed_at: m.completed_at,
            },
            None => PaymentState::default(),
        }
    }

    pub fn both_paid(&self) -> bool {
        self.self_paid_at.is_some() && self.counterparty_paid_at.is_some()
    }
}

/// Handed out by a successful completion; scopes the rating to the counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingPrompt {
    pub listing_id: String,
    pub counterparty_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rating {
    stars: u8,
    comment: Option<String>,
}

impl Rating {
    pub const MIN_STARS: u8 = 1;
    pub const MAX_STARS: u8 = 5;

    pub fn new(stars: u8, comment: Option<&str>) -> Result<Self> {
        if !(Self::MIN_STARS..=Self::MAX_STARS).contains(&stars) {
            return Err(ExchangeError::InvalidInput(format!(
                "rating must be between {} and {} stars, got {}",
                Self::MIN_STARS,
                Self::MAX_STARS,
                stars
            )));
        }
        Ok(Rating {
            stars,
            comment: comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    pub fn stars(&self) -> u8 {
        self.stars
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentGate {
    state: PaymentState,
    completed: bool,
    rated: bool,
}

impl PaymentGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PaymentState {
        &self.state
    }

    /// Replace with server-confirmed timestamps. Returns true if anything changed.
    pub fn refresh(&mut self, state: PaymentState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    /// Paying and completing are only offered once time and location are both accepted.
    /// Whether both payments landed is for the server to decide.
    pub fn ensure_confirmed(meeting: &MeetingState) -> Result<()> {
        if meeting.is_confirmed() {
            Ok(())
        } else {
            Err(ExchangeError::MeetingNotConfirmed)
        }
    }

    /// Completed by us this session, or reported completed by the server
    pub fn is_completed(&self) -> bool {
        self.completed || self.state.completed_at.is_some()
    }

    pub fn ensure_not_completed(&self) -> Result<()> {
        if self.is_completed() {
            Err(ExchangeError::InvalidInput("exchange already completed".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_rated(&self) -> bool {
        self.rated
    }

    pub fn ensure_not_rated(&self) -> Result<()> {
        if self.rated {
            Err(ExchangeError::InvalidInput("rating already submitted".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn mark_rated(&mut self) {
        self.rated = true;
    }

    /// Amount due in the payer's currency
    pub async fn quote(
        converter: &dyn CurrencyConverter,
        amount: f64,
        from: &str,
        to: &str,
    ) -> Result<f64> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(ExchangeError::InvalidInput(format!("invalid amount {}", amount)));
        }
        if from.eq_ignore_ascii_case(to) {
            return Ok(amount);
        }
        converter.convert(amount, from, to).await
    }
}
