//! Tenant index naming as done by the Opensearch security plugin.
//!
//! The plugin stores each tenant's saved objects in an index named after a
//! Java `String.hashCode()` of the tenant name followed by a sanitized copy of
//! the name, so both parts have to match bit for bit.

/// Java `String.hashCode()` over the UTF-8 bytes of `s`.
pub fn java_string_hash(s: &str) -> i32 {
    s.bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b))) as i32
}

/// Lowercases `s` and drops every character outside `[a-z0-9]`.
pub fn sanitize_index_name(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        .collect()
}

/// Returns `<hash>_<sanitized>`, the index name prefix for a tenant.
pub fn hash_prefix(s: &str) -> String {
    format!("{}_{}", java_string_hash(s), sanitize_index_name(s))
}
