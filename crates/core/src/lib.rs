//! Data model shared by the queue, broker and cache layers.
//!
//! This crate contains **pure** types (no store or network concerns): the
//! `Job` and `Message` records, the JSON codec they travel through, and the
//! error vocabulary every store adapter reports in.

pub mod codec;
pub mod error;
pub mod job;
pub mod message;

pub use codec::{decode, encode};
pub use error::{CodecError, StoreError, StoreResult};
pub use job::{Job, new_job_id};
pub use message::{MESSAGE_RECORD, Message, RAW_KEY};

/// Arbitrary structured data carried by jobs and messages.
///
/// Any JSON-like shape is accepted; no schema is enforced.
pub type Payload = serde_json::Map<String, serde_json::Value>;
