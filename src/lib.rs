//! WeChat Backup Handler - extract WeChat databases from iOS backups and
//! export chat history.
//!
//! The pipeline has two stages:
//!
//! 1. **Backup resolution**: [`infrastructure::ManifestIndex`] maps a
//!    `(domain, relativePath)` pair to its file in the backup's hashed store,
//!    [`application::resolve`] picks the WeChat databases and
//!    [`application::extract_backup`] copies them out atomically.
//! 2. **Chat assembly**: [`application::ChatSession`] opens the extracted
//!    contact database and message shards read-only, merges a contact's
//!    history across shards in timestamp order, filters it and exports it as
//!    text, JSON or CSV.

pub mod application;
pub mod domain;
pub mod infrastructure;
