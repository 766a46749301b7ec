pub mod error;
pub mod handler;
pub mod session;
pub mod transport;

pub use error::{Result, SessionError};
pub use handler::Handler;
pub use session::{current_session, InitHandlerId, Session, SessionState};
pub use transport::{InboundFrame, Transport};
