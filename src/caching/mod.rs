//! # Caching Module
//!
//! Request coalescing. [`CoalescingGroup`] deduplicates concurrent identical computations
//! inside controllers; [`CoalescingRouter`] applies the same idea to whole requests in front
//! of a router.

pub mod coalescing;
pub mod request_coalescer;

pub use coalescing::{key, Coalesced, CoalescingGroup};
pub use request_coalescer::CoalescingRouter;
