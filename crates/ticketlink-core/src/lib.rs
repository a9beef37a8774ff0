//! ticketlink-core - domain logic for linking commits to issue-tracker tickets.
//!
//! This crate owns the commit log parser, the reconciliation engine, the
//! SQLite link index, git history access, the deduplicating sync queue and
//! the ticket lookup service.

pub mod access;
pub mod config;
pub mod core;
pub mod index;
pub mod lifecycle;
pub mod parser;
pub mod reconcile;
pub mod scm;
