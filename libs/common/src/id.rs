use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = relay_common::id::prefixed_ulid(relay_common::id::prefix::SESSION);
/// assert!(id.starts_with("ses_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Server-issued session identifier, delivered via cookie.
    pub const SESSION: &str = "ses";
    /// Browser-generated client identifier, persisted across reconnects.
    pub const CLIENT: &str = "user";
}
