pub mod details;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod flow;
pub mod health;
pub mod queue;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use details::{DetailsResolver, SessionDetails, StaticResolver};
pub use endpoint::{Endpoint, SessionId};
pub use error::SessionError;
pub use factory::SessionFactory;
pub use flow::{CreditConfig, CreditedConsumer, FlowSignal, RenderReceipt, RenderSink};
pub use health::{HealthProbe, HealthStatus, ReqwestHealthProbe};
pub use reconnect::ReconnectPolicy;
pub use session::{
    SessionConsumer, SessionDeps, SessionHandle, SessionOptions, SessionSnapshot, SessionState,
    SessionStatus, TerminalRegistry,
};
pub use transport::{Connector, TransportError, WebSocketConnector};

#[cfg(test)]
mod tests;
