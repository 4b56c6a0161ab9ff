//! Validated command dispatch
//!
//! Couples the speech and manual input paths to the connection under the
//! ordering and validation contract: trim, reject empty, check current
//! connectivity, send at most once.

mod dispatcher;

pub use dispatcher::{Command, CommandDispatcher, DispatchError};
