//! Request-path matching.

/// Strip the query string and trailing slashes. The root stays `/`.
pub fn normalize(path: &str) -> &str {
    let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Does `actual` address `expected`?
///
/// With `full_path` the normalized paths must be equal. Otherwise `expected`
/// may also be a leading run of whole segments of `actual`, so `/webrtc`
/// matches `/webrtc/whep` but not `/webrtcx`.
pub fn urls_match(expected: &str, actual: &str, full_path: bool) -> bool {
    let expected = normalize(expected);
    let actual = normalize(actual);

    if expected == actual {
        return true;
    }
    if full_path {
        return false;
    }
    if expected == "/" {
        return true;
    }
    actual
        .strip_prefix(expected)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Last path segment below `prefix`, if there is one.
pub fn trailing_segment<'a>(prefix: &str, actual: &'a str) -> Option<&'a str> {
    if !urls_match(prefix, actual, false) {
        return None;
    }
    let actual = normalize(actual);
    let rest = actual.get(normalize(prefix).len()..)?;
    rest.rsplit('/').find(|segment| !segment.is_empty())
}
