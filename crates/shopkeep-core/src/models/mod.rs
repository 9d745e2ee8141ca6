//! Request and response types for the retail-management API.
//!
//! Domain records (products, suppliers, purchase orders, ...) are kept as
//! opaque JSON; only the envelopes and the account payloads are typed.

pub mod account;
pub mod page;

pub use account::{MessageResponse, ProfileUpdate, RegisterRequest};
pub use page::{ListQuery, Page};
