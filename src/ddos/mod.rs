//! Flood protection for IP-keyed traffic.

mod guard;

pub use guard::{DdosGuard, ResetTask};
