//! Buffer storage that outlives single packet operations.
//!
//! The only resident here is the packet buffer pool. Every packet the core
//! touches lives in a [`pbuf::Pool`] and is addressed through a
//! [`pbuf::Handle`]; the pool owns the bytes, handles move between layers.
pub mod pbuf;
