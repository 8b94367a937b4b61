//! # deer-core
//!
//! Core types and abstractions shared by the Deer crates.
//!
//! This crate provides:
//! - Tool definitions and execution types
//! - Configuration system (including MCP server recipes)
//! - Common error types

pub mod config;
pub mod error;
pub mod tool;

pub use config::{Config, McpConfig, McpServerConfig, ServerTransport};
pub use error::{Error, Result};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
