//! Reader connection protocol engine.
//!
//! Every reader connection runs its own state machine on top of a small
//! reliability layer (acknowledged sends with retry) and a shared
//! connection registry. The [`Gateway`] bridge lets the rest of the
//! backend start card enrollment or reset on a connected reader and
//! react to domain events.
//!
//! # Architecture
//!
//! ```text
//! socket ──► reader task ──► dispatcher queue ──► StateMachine ──► ReaderState
//!               │  (acks resolve          ▲            │
//!               │   CorrelationTable)     │            ▼
//!               └── heartbeat echo   Gateway bridge  writer task ──► socket
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod correlation;
pub mod credentials;
pub mod error;
pub mod events;
pub mod firmware;
pub mod gateway;
pub mod machine;
pub mod memory;
pub mod provisioning;
pub mod registry;
pub mod server;
pub mod services;
pub mod states;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult, LifecyclePhase};
pub use events::{DomainEvent, DomainEventBus};
pub use gateway::Gateway;
pub use machine::{StateKind, Transition};
pub use registry::{ConnectionInfo, ConnectionRegistry, StateTransition};
pub use server::{TcpServer, TcpServerConfig, TcpServerError};
pub use services::Services;
