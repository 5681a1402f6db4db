// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error kinds shared across the Device Runtime Core.
//!
//! Mirrors `spec.md` §7: a small, closed set of error kinds rather than a
//! per-module proliferation of types. Decode errors are logged and dropped
//! by their caller (never propagated into a state machine); timeouts are
//! surfaced to the owner of the request and retried up to a cap.

use thiserror::Error;

/// Errors returned by the Device Runtime Core.
#[derive(Debug, Error)]
pub enum Error {
    /// Lookup failed: unknown atom, sub-device, or request id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input violated a documented constraint.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current state machine state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// On-wire bytes could not be parsed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A correlated response did not arrive within its window.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// A subsystem is throttled (OTA in progress, task queue saturated).
    #[error("busy: {0}")]
    Busy(String),

    /// Underlying adapter (persistence, radio) reported failure.
    #[error("io error: {0}")]
    Io(String),

    /// Signature verification failed; caller fell back to a lower trust tier.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Feature detection found the device lacks a required capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_carry_context() {
        let e = Error::NotFound("atom 42".into());
        assert_eq!(e.to_string(), "not found: atom 42");

        let e = Error::Timeout("configure-report#7".into());
        assert_eq!(e.to_string(), "timeout waiting for configure-report#7");
    }
}
