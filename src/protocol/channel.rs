//! Channel names and glob patterns
//!
//! Channel names are absolute, slash-separated paths. A pattern may end in
//! `*` (exactly one more segment) or `**` (zero or more trailing segments);
//! wildcards are not allowed anywhere else.

pub const HANDSHAKE: &str = "/meta/handshake";
pub const CONNECT: &str = "/meta/connect";
pub const SUBSCRIBE: &str = "/meta/subscribe";
pub const UNSUBSCRIBE: &str = "/meta/unsubscribe";
pub const DISCONNECT: &str = "/meta/disconnect";

const META_PREFIX: &str = "/meta/";
const SERVICE_PREFIX: &str = "/service/";

pub fn is_meta(name: &str) -> bool {
    name.starts_with(META_PREFIX)
}

pub fn is_service(name: &str) -> bool {
    name.starts_with(SERVICE_PREFIX)
}

pub fn is_pattern(name: &str) -> bool {
    name.ends_with("/*") || name.ends_with("/**")
}

pub fn segments(name: &str) -> Option<Vec<&str>> {
    if !is_valid(name) {
        return None;
    }
    Some(name[1..].split('/').collect())
}

/// Checks that `name` is `/seg(/seg)*` with wildcards only in last place.
pub fn is_valid(name: &str) -> bool {
    let Some(path) = name.strip_prefix('/') else {
        return false;
    };
    let parts: Vec<&str> = path.split('/').collect();
    let last = parts.len() - 1;
    parts.iter().enumerate().all(|(i, seg)| match *seg {
        "" => false,
        "*" | "**" => i == last,
        other => other.chars().all(is_segment_char),
    })
}

fn is_segment_char(c: char) -> bool {
    c.is_alphanumeric() || "-_!~()$@.".contains(c)
}

/// Every pattern that matches the concrete channel `name`, including the
/// name itself.
///
/// `/foo/bar` expands to `/**`, `/foo/bar`, `/foo/*`, `/foo/**` and
/// `/foo/bar/**`.
pub fn expand(name: &str) -> Vec<String> {
    let Some(segs) = segments(name) else {
        return Vec::new();
    };
    let mut patterns = vec!["/**".to_string(), name.to_string()];

    let mut single = segs.clone();
    if let Some(last) = single.last_mut() {
        *last = "*";
    }
    patterns.push(unparse(&single));

    for i in 1..=segs.len() {
        let mut deep = segs[..i].to_vec();
        deep.push("**");
        patterns.push(unparse(&deep));
    }
    patterns.dedup();
    patterns
}

/// Whether `pattern` glob-matches the concrete channel `name`.
pub fn matches(pattern: &str, name: &str) -> bool {
    let (Some(pat), Some(segs)) = (segments(pattern), segments(name)) else {
        return false;
    };
    match pat.split_last() {
        Some((&"**", prefix)) => segs.len() >= prefix.len() && segs[..prefix.len()] == *prefix,
        Some((&"*", prefix)) => segs.len() == prefix.len() + 1 && segs[..prefix.len()] == *prefix,
        _ => pat == segs,
    }
}

fn unparse(segments: &[&str]) -> String {
    format!("/{}", segments.join("/"))
}
