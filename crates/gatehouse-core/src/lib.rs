//! `gatehouse-core`: data model and pure decision logic for group-based permissions.
//!
//! Nothing in this crate performs IO against the permission backend; fetching,
//! caching and coordination live in `gatehouse-auth`.

pub mod clock;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GatehouseError, PermissionError, Result};
pub use evaluator::{can_create, can_delete, can_edit, can_manage, can_view, evaluate};
pub use types::*;
