//! FIFO job queue with delayed scheduling.
//!
//! ## Design
//!
//! - A queue is a list in the store; jobs are pushed at one end and popped at
//!   the other, so a single consumer sees FIFO order
//! - Each queue `<name>` owns a companion sorted set `<name>:delayed` scored by
//!   the Unix second at which a job becomes ready
//! - Promotion moves ready jobs from the delayed set into the live queue
//!
//! ## Components
//!
//! - `JobQueue`: push/pop/size/clear plus delayed push and promotion
//! - `DelayedPromoter`: background thread that promotes on an interval

pub mod delayed;
pub mod error;
pub mod promoter;
pub mod queue;

pub use delayed::delayed_key;
pub use error::{PromoterError, QueueError};
pub use promoter::{DelayedPromoter, PromoterConfig, PromoterHandle, PromoterStats};
pub use queue::JobQueue;
pub use skein_core::{Job, Payload};
