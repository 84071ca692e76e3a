// Dashboard aggregate: summary, purchased contacts and negotiations in one refresh
//
// The three reads run concurrently and are applied together once all have settled.
// A failing read degrades to an empty value instead of failing the refresh.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::api::ExchangeApi;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::models::{DashboardSummary, NegotiationSummary, PurchasedContact};
use crate::negotiation::{LoadOutcome, RequestGeneration};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub summary: DashboardSummary,
    pub contacts: Vec<PurchasedContact>,
    pub negotiations: Vec<NegotiationSummary>,
}

impl DashboardSnapshot {
    /// Negotiations the server flagged with a status hint
    pub fn needing_attention(&self) -> impl Iterator<Item = &NegotiationSummary> {
        self.negotiations.iter().filter(|n| n.status_hint.is_some())
    }
}

pub struct Dashboard {
    config: SessionConfig,
    api: Arc<dyn ExchangeApi>,
    generation: RequestGeneration,
    snapshot: TokioMutex<DashboardSnapshot>,
}

impl Dashboard {
    pub fn new(config: SessionConfig, api: Arc<dyn ExchangeApi>) -> Self {
        Dashboard {
            config,
            api,
            generation: RequestGeneration::new(),
            snapshot: TokioMutex::new(DashboardSnapshot::default()),
        }
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Fetch all three parts. A refresh started later supersedes this one.
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        let auth = self.config.token()?;
        let token = self.generation.mint();
        debug!("Refreshing dashboard (request {})", token.generation());

        let (summary, contacts, negotiations) = futures::join!(
            self.api.get_dashboard_summary(auth),
            self.api.get_purchased_contacts(auth),
            self.api.get_negotiations(auth),
        );

        let fresh = DashboardSnapshot {
            summary: summary.unwrap_or_else(|e| {
                warn!("Dashboard summary unavailable: {}", e);
                DashboardSummary::default()
            }),
            contacts: contacts.unwrap_or_else(|e| {
                warn!("Purchased contacts unavailable: {}", e);
                Vec::new()
            }),
            negotiations: negotiations.unwrap_or_else(|e| {
                warn!("Negotiations unavailable: {}", e);
                Vec::new()
            }),
        };

        let mut snapshot = self.snapshot.lock().await;
        if !self.generation.is_current(token) {
            debug!("Discarding stale dashboard refresh {}", token.generation());
            return Ok(LoadOutcome::Discarded);
        }
        info!(
            "Dashboard: {} contacts, {} negotiations",
            fresh.contacts.len(),
            fresh.negotiations.len()
        );
        *snapshot = fresh;
        Ok(LoadOutcome::Applied)
    }
}
