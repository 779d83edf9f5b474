//! Value types shared by the query and repository layers.
//!
//! # Responsibility
//! - Describe pages of results (`page`), generic rows (`record`) and the
//!   entity contract the repository persists (`entity`).
//!
//! # Invariants
//! - `Page::total_page` always agrees with the last `total_row`/`page_size` pair.
//! - `Record` keeps column order exactly as the statement returned it.

pub mod entity;
pub mod page;
pub mod record;
