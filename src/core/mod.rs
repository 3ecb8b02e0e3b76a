pub mod backoff;
pub mod frame;
pub mod health;
pub mod protocol;
pub mod types;

pub use backoff::*;
pub use frame::*;
pub use health::*;
pub use protocol::*;
pub use types::*;
