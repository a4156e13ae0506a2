pub mod channels;
pub mod error;
pub mod models;
pub mod policy;
pub mod routing;
pub mod services;
pub mod templates;

pub use channels::{ChannelAdapter, LoggingChannel, SendOutcome, WebhookChannel};
pub use error::{ChannelError, DispatchError};
pub use models::*;
pub use policy::DispatchPolicy;
pub use routing::RoutingTable;
pub use services::*;
pub use templates::{MessageTemplates, TemplatedMessage};
