mod account;
mod event;
mod health;
mod metrics;

pub use account::{delete_account, sign_in_with_apple};
pub use event::{process_event, search};
pub use health::health_handler;
pub use metrics::metrics_handler;
