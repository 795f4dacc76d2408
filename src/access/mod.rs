//! Roles, permissions and the request-time permission gate.

mod actor;
pub mod gate;
mod permission;
mod role;

pub use actor::Actor;
pub use gate::{enforce, DecisionRule, PermissionGate};
pub use permission::{Permission, PermissionSet, UnknownPermission};
pub use role::{Role, UnknownRole};
