// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid URL '{0}': must start with http:// or https://")]
    InvalidUrl(String),

    #[error("connection timeout after {0}s")]
    ConnectTimeout(u64),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection not ready (state: {0})")]
    NotReady(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tool index cache error: {0}")]
    Cache(String),
}
