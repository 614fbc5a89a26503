//! Building blocks handed to leaves through the exec context.

pub mod pinger;
pub mod runner;
pub mod servod;
pub mod versioner;

pub use pinger::{wait_until_not_pingable, wait_until_pingable, Pinger};
pub use runner::{Runner, TIMEOUT_EXIT_CODE};
pub use servod::Servod;
pub use versioner::{CrosVersionInfo, Versioner};
