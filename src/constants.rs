//! Application-wide constants for tongues.
//!
//! This module centralizes the magic numbers and wire markers shared by the
//! connection manager, the session controller and the binary.
//!
//! # Categories
//!
//! - **Endpoints**: default relay address and session path
//! - **Polling**: health sampling cadence
//! - **Reconnect**: backoff bounds for the opt-in retry policy
//! - **Wire markers**: sender values with special meaning

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Relay endpoint used when neither config nor environment name one.
///
/// `127.0.0.1` rather than `localhost` avoids IPv6 resolution surprises
/// against relays that only bind IPv4.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000";

/// Path segment between the host and the session identity in the target URL.
pub const DEFAULT_SESSION_PATH: &str = "ws";

/// Query parameter carrying the language preference.
pub const LANGUAGE_QUERY_PARAM: &str = "lang";

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for the relay's metrics endpoints.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay route serving the performance report.
pub const METRICS_PATH: &str = "metrics";

/// Relay route serving the health summary.
pub const HEALTH_PATH: &str = "health";

/// Report text the relay returns before any translation was measured.
pub const NO_PERFORMANCE_DATA: &str = "No performance data available";

// ============================================================================
// Polling
// ============================================================================

/// Interval at which the session samples connection health.
///
/// Bounds how stale the published connection status can get when no
/// push notification arrives.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Reconnect
// ============================================================================

/// First delay before an automatic reconnect attempt (backoff policy only).
pub const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound for the doubling reconnect delay.
pub const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);

// ============================================================================
// Wire markers
// ============================================================================

/// Sender marker for messages echoed locally on send.
pub const LOCAL_SENDER: &str = "me";

/// Sender marker for inbound payloads that could not be decoded.
pub const SERVER_SENDER: &str = "server";

/// Sender the relay uses for join/leave notices.
pub const SYSTEM_SENDER: &str = "System";

/// Frame `type` value that marks a transient status frame.
pub const STATUS_FRAME_TYPE: &str = "status";

/// Prefix for generated session identities.
pub const IDENTITY_PREFIX: &str = "user_";
