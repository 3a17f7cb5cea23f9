// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The durable state store: a crash-safe mapping from workflow-id to
//! `WorkflowState`.
//!
//! Two implementations are provided, both satisfying "save is atomic with
//! respect to concurrent readers":
//!
//! - [`InMemoryStateStore`] — a `dashmap`-backed store, useful for tests and
//!   the CLI demo.
//! - [`SqliteStateStore`] — a `sqlx` SQLite-backed store with one transaction
//!   per `save`, for anything that needs the store to survive a restart.
//!
//! # Examples
//!
//! ```
//! # use cloudflow_state::{InMemoryStateStore, StateStore};
//! # use cloudflow_domain::WorkflowState;
//! # use std::collections::HashMap;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStateStore::new();
//! let state = WorkflowState::new("wf-1", "demo", HashMap::new());
//! store.save(&state).await?;
//! let loaded = store.load("wf-1").await?;
//! assert_eq!(loaded.id, "wf-1");
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{StateFilter, StateStore, StateStoreError, StateStoreResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
