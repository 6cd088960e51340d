//! Session state: models, persistence, and the in-memory registry.

mod models;
mod registry;
mod store;

pub use models::{CommitRecord, CommitStatus, ModelRef, SessionRecord};
pub use registry::SessionRegistry;
pub use store::SessionStore;
