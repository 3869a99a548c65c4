pub mod broker;
pub mod error;
pub mod fanout;
pub mod service;

pub use broker::{Broker, DeliveryError};
pub use error::SyncError;
pub use fanout::{DeliveryReport, FanoutRouter};
pub use service::SyncService;
