//! Session layer: port settings, the owned stream, and the session facade.
//!
//! [`SerialSession`] is the collaborator that calls into
//! [`fixer`](crate::fixer) before opening and into
//! [`teardown`](crate::teardown) when disposed.

pub mod error;
pub mod mock;
pub mod session;
pub mod stream;
pub mod traits;

pub use error::PortError;
pub use session::{SerialSession, SessionOptions};
pub use stream::SerialStream;
pub use traits::*;
