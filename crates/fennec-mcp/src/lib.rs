// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP control plane.
//!
//! Connection lifecycle for remote tool servers, a tool index with
//! persistent cache and TTL-based refresh, and a router that uses LLM
//! function calling to select a tool for a goal.

mod connection;
mod control;
mod error;
mod index;
mod router;

pub use connection::{ConnectionState, McpConnection, SharedConnection, ToolCallEnvelope};
pub use control::McpControlPlane;
pub use error::McpError;
pub use index::{ToolIndex, ToolIndexEntry};
pub use router::{HistoryEntry, Router, RouterContext, RouterDecision, ROUTER_SYSTEM_PROMPT};
