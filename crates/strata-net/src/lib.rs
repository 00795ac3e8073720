// Client-server transport: the async `Transport` seam used by the sync engine
// and the key-exchange tasks, plus its reqwest implementation.

pub mod error;
pub mod http;
pub mod transport;

pub use error::{NetError, Result};
pub use http::{HttpConfig, HttpTransport};
pub use transport::{MessagesRequest, SyncRequest, Transport};
