//! Financial Document Orchestrator
//!
//! Ingests financial documents, extracts structured data and answers
//! natural-language requests over them:
//! - Upload → validation → extraction document lifecycle
//! - Intent routing between compliance checks and document Q&A
//! - A constrained formula engine for regulatory ratios
//! - Tenant-scoped tools shared with external reasoning agents
//!
//! REQUEST LOOP:
//! CLASSIFY → RECORD → DISPATCH TOOLS → PERSIST TERMINAL STATUS

pub mod api;
pub mod blob;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extraction;
pub mod formula;
pub mod gemini;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod planner;
pub mod services;
pub mod state;
pub mod supervisor;
pub mod tools;
pub mod upload;
pub mod usage;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use services::{Backends, Services};
