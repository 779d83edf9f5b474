//! Repository layer: lifecycle, transactions and query orchestration.
//!
//! # Responsibility
//! - Own the `Repo` lifecycle and its runtime (`repository`).
//! - Scope units of work and detect nested entries (`scope`).
//! - Carry every operation inside one transaction (`session`).
//!
//! # Invariants
//! - Every public `Repo` operation runs inside `TransactionScope::run`.
//! - Errors surface as `RepoError`; nothing is retried.

pub mod error;
pub mod repository;
pub mod scope;
pub mod session;
