//! Roster integrity core: validated updates to player records, with every
//! derived metric recomputed, persisted and audited in one pass.

pub mod audit;
pub mod cascade;
pub mod config;
pub mod error;
pub mod field;
pub mod impact;
pub mod locks;
pub mod orchestrator;
pub mod record;
pub mod registry;
pub mod rules;
pub mod store;
pub mod types;
pub mod update;
pub mod validator;
