//! JSON-RPC error codes.
//!
//! The negative range `-32768..=-32000` is reserved by JSON-RPC. Codes from
//! `-32099` to `-32000` are free for server-defined errors.

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32_700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32_600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32_602;
/// Internal orchestrator error.
pub const INTERNAL_ERROR: i64 = -32_603;

/// A requested mount escapes the allowed roots.
pub const MOUNT_NOT_ALLOWED: i64 = -32_001;
/// The named service is not configured.
pub const SERVICE_NOT_FOUND: i64 = -32_002;
/// The backing container could not be started or failed its health check.
pub const CONTAINER_START_FAILURE: i64 = -32_003;
/// Forwarding to the service container failed.
pub const PROXY_ERROR: i64 = -32_004;
/// The service container did not answer in time.
pub const UPSTREAM_TIMEOUT: i64 = -32_005;
