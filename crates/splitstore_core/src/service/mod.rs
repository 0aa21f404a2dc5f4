//! Use-case services layered over the repository stores.
//!
//! # Responsibility
//! - Orchestrate store calls into caller-facing operations.
//! - Keep entry points decoupled from storage details.

pub mod audit_log_service;

pub use audit_log_service::AuditLogService;
