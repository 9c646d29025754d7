//! Resource name derivation
//!
//! Every app is addressed by a single internal name derived from its owner and
//! app name. The same name keys the Deployment and the Service; the Ingress
//! appends a fixed suffix. Distinct pairs that slugify and truncate to the same
//! 63 characters share one name, and the last deploy wins.

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

/// Reduce an arbitrary string to a lowercase `[a-z0-9-]` token
///
/// Every character outside that set becomes `-`, runs of `-` collapse and
/// leading/trailing dashes are dropped. Blank input yields an empty token.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug.trim_matches('-').to_string()
}

/// Derive the internal name for an (owner, app) pair
///
/// `slugify(owner)-slugify(app)`, cut to [`MAX_NAME_LEN`]. The result is not
/// guaranteed to be valid (truncation may leave a trailing dash); check it
/// with [`validate_name`].
pub fn derive_name(owner: &str, app_name: &str) -> String {
    let mut name = format!("{}-{}", slugify(owner), slugify(app_name));
    name.truncate(MAX_NAME_LEN);
    name
}

/// Whether `name` is a legal DNS-1123 label: `[a-z0-9]([-a-z0-9]*[a-z0-9])?`, at most 63 chars
pub fn validate_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= MAX_NAME_LEN
                && alnum(first)
                && alnum(last)
                && bytes.iter().all(|b| alnum(b) || *b == b'-')
        }
        _ => false,
    }
}
