pub mod permission;

pub use permission::{require_permission, Authenticated, Permission};
