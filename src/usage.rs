use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::USAGE_EVENT_FAILURES;
use crate::supabase::AccountStore;

/// One admitted, authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    #[serde(rename = "UserId")]
    pub user_id: String,
    #[serde(rename = "EventType")]
    pub event_type: String,
}

/// Best-effort usage notification.
///
/// `notify` returns immediately and never fails. Delivery happens in the
/// background, so callers must not rely on the event having been stored
/// (or stored at all) when it returns.
pub trait UsageSink: Send + Sync {
    fn notify(&self, event: UsageEvent);
}

// Ships usage events to the account store on a spawned task
pub struct StoreUsageSink {
    store: Arc<dyn AccountStore>,
}

impl StoreUsageSink {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }
}

impl UsageSink for StoreUsageSink {
    fn notify(&self, event: UsageEvent) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.add_usage_event(&event).await {
                Ok(()) => debug!(user_id = %event.user_id, event_type = %event.event_type, "usage event recorded"),
                Err(e) => {
                    USAGE_EVENT_FAILURES.inc();
                    warn!(user_id = %event.user_id, error = %e, "failed to record usage event");
                }
            }
        });
    }
}
