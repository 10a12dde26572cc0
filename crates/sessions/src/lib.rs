//! In-memory session & message store for the gateway (§4.1).
//!
//! # Usage
//! ```rust,ignore
//! use ax_sessions::SessionStore;
//! use ax_domain::session::{Role, Part};
//!
//! let store = SessionStore::new();
//! let session = store.create(Some("demo".into()));
//! store.append_message(&session.id, Role::User, vec![Part::Text { text: "hi".into() }])?;
//! let history = store.to_history(&session.id)?;
//! ```

pub mod store;

pub use store::SessionStore;
