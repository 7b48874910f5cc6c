//! # warden
//!
//! A hierarchical authorization engine answering "may subject S perform
//! permission P on object O?" over three independent DAGs of subjects,
//! objects, and permissions, with signed access rules that propagate through
//! the hierarchies. An explicit negative rule always overrides any positive
//! rule reachable through propagation.
//!
//! ## Architecture
//!
//! - **Engine facade** (`engine`): registration, rules, edges, decisions
//! - **Hierarchies** (`hierarchy`): acyclic graphs with a materialized
//!   transitive-closure index, one per entity kind
//! - **Decision core** (`decide`): negative-first evaluation over closure sets
//! - **Declarations** (`declare`): TOML policy baseline with idempotent
//!   reconciliation that never touches runtime state
//! - **Store** (`store`): single-writer ACID transactions via `redb`
//!
//! ## Library usage
//!
//! ```
//! use warden::engine::Engine;
//!
//! let engine = Engine::in_memory().unwrap();
//! engine.register_subject("alice", "Alice").unwrap();
//! engine.register_object("doc", "The document").unwrap();
//! engine.register_permission("read", "Read access").unwrap();
//!
//! engine.grant("alice", "doc", "read").unwrap();
//! assert!(engine.is_granted("alice", "doc", "read").unwrap());
//! ```

pub mod declare;
pub mod engine;
pub mod entity;
pub mod error;
pub mod ident;
pub mod paths;

mod decide;
mod hierarchy;
mod rules;
mod store;
