//! `/`-separated path helpers shared by the local and remote sides.
//!
//! Remote paths are always POSIX style, so both sides of a copy are handled as plain strings.
//! Paths produced by [`join`] are lexically cleaned, which is what ignore lists and permission
//! rules are compared against.

/// Lexically cleans a path: collapses repeated separators, drops `.` elements and resolves `..`
/// against the preceding element. Returns `"."` for an empty result on relative paths and `"/"`
/// on rooted ones.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !rooted {
                    // ".." can't go above root, but a relative path keeps it
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Joins two path elements and cleans the result. Empty leading elements are skipped and two
/// empty elements produce an empty string.
pub fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, true) => String::new(),
        (true, false) => clean(name),
        (false, _) => clean(&format!("{base}/{name}")),
    }
}

/// Last element of the path, ignoring trailing separators.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything but the last element of the path, cleaned.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => clean(&path[..=idx]),
        None => ".".to_string(),
    }
}
