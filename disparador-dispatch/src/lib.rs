pub mod dashboard;
pub mod initiator;
pub mod observer;
pub mod receiver;
pub mod relay;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use dashboard::{DashboardView, DASHBOARD_POLL_INTERVAL_SECS, RECENT_DISPATCH_LIMIT};
pub use initiator::CreateDispatch;
pub use observer::Subscription;
pub use receiver::{StatusAck, StatusReport};
pub use relay::{HttpRelay, RelayClient, RelayJob};
pub use service::{Actor, DispatchService};
