// External capabilities consumed by the negotiation core
// Map search and currency conversion live outside this crate; only their contracts are here

use async_trait::async_trait;

use crate::error::Result;
use crate::models::MeetingLocation;

/// Geocoded place search returning named points with coordinates
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<MeetingLocation>>;
}

/// Converts an amount between two currency codes
#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64>;
}
