// Dashboard aggregate refresh
mod common;

use common::*;
use std::sync::Arc;
use swapmeet::api::ExchangeApi;
use swapmeet::negotiation::LoadOutcome;
use swapmeet::{
    Dashboard, DashboardSummary, ExchangeError, NegotiationSummary, PurchasedContact, SessionConfig,
};

fn seeded_api() -> Arc<MockExchangeApi> {
    let api = MockExchangeApi::new();
    {
        let mut state = api.state.lock().unwrap();
        state.summary = DashboardSummary {
            active_listings: 2,
            pending_actions: 1,
            completed_exchanges: 7,
        };
        state.contacts = vec![PurchasedContact {
            listing_id: LISTING.to_string(),
            user_id: COUNTERPARTY_ID.to_string(),
            display_name: COUNTERPARTY_NAME.to_string(),
        }];
        state.negotiations = vec![NegotiationSummary {
            listing_id: LISTING.to_string(),
            counterparty_name: COUNTERPARTY_NAME.to_string(),
            status_hint: Some("Accept the proposed location".to_string()),
        }];
    }
    api
}

fn dashboard_for(api: &Arc<MockExchangeApi>) -> Dashboard {
    let api: Arc<dyn ExchangeApi> = api.clone();
    Dashboard::new(test_config(), api)
}

#[tokio::test]
async fn test_refresh_joins_all_parts() {
    setup_logging();
    let api = seeded_api();
    let dashboard = dashboard_for(&api);

    assert_eq!(dashboard.refresh().await.unwrap(), LoadOutcome::Applied);
    let snapshot = dashboard.snapshot().await;

    assert_eq!(snapshot.summary.completed_exchanges, 7);
    assert_eq!(snapshot.contacts.len(), 1);
    assert_eq!(snapshot.negotiations.len(), 1);
    assert_eq!(snapshot.needing_attention().count(), 1);

    for operation in ["GetDashboardSummary", "GetPurchasedContacts", "GetNegotiations"] {
        assert_eq!(api.calls(operation), 1, "{}", operation);
    }
}

#[tokio::test]
async fn test_failed_part_degrades_to_empty() {
    setup_logging();
    let api = seeded_api();
    let dashboard = dashboard_for(&api);
    dashboard.refresh().await.unwrap();

    api.fail("GetPurchasedContacts", ExchangeError::Network("502 Bad Gateway".to_string()));
    api.fail("GetDashboardSummary", ExchangeError::Malformed("missing field".to_string()));
    assert_eq!(dashboard.refresh().await.unwrap(), LoadOutcome::Applied);

    let snapshot = dashboard.snapshot().await;
    assert_eq!(snapshot.summary, DashboardSummary::default());
    assert!(snapshot.contacts.is_empty());
    assert_eq!(snapshot.negotiations.len(), 1);
    assert_eq!(api.calls("GetNegotiations"), 2);
}

#[tokio::test]
async fn test_refresh_without_token() {
    setup_logging();
    let api = seeded_api();
    let dyn_api: Arc<dyn ExchangeApi> = api.clone();
    let dashboard = Dashboard::new(SessionConfig::new("http://mock.invalid"), dyn_api);

    assert!(matches!(dashboard.refresh().await, Err(ExchangeError::MissingSession)));
    assert_eq!(api.total_calls(), 0);
    assert!(dashboard.snapshot().await.contacts.is_empty());
}
