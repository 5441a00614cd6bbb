//! # catcord-store
//!
//! Platform services the Catcord client runs on: a document database with
//! realtime subscriptions, an authentication service, and a blob store.
//!
//! Each service is a trait so the client can run against the hosted backend
//! or against the self-hosted implementations in this crate (`LocalStore`,
//! `LocalAuth`, `FsBlobStore`), which keep everything on one machine.

pub mod auth;
pub mod blobs;
pub mod document;
pub mod local;
pub mod query;
pub mod store;

mod error;

pub use auth::{AuthService, AuthUser, LocalAuth};
pub use blobs::{BlobStore, FsBlobStore};
pub use document::{Document, DocumentSnapshot};
pub use error::{Result, StoreError};
pub use local::LocalStore;
pub use query::{Direction, Filter, Query};
pub use store::{DocumentStore, DocumentWatcher, QueryWatcher};
