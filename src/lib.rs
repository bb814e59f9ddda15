pub mod auth;
pub mod dns;
pub mod error;
pub mod link;
pub mod log;
pub mod parser;
pub mod pppd;
pub mod route;
pub mod session;
pub mod ssl_verifiers;
pub mod tools;
pub mod transport;
pub mod types;

pub use error::SessionError;
pub use session::TunnelOrchestrator;
pub use types::{Credentials, SessionParameters, TunnelState};
