//! Bookkeeping of relations added and deleted by a transaction.
//!
//! A relation id is in at most one of the two trackers. Removing a new
//! relation unwinds it from the added tracker and never records a deletion.

pub mod added;
pub mod deleted;

pub use added::{AddedRelations, ConcurrentAddedRelations, SimpleAddedRelations, added_relations};
pub use deleted::DeletedRelations;
