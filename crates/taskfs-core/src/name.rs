//! Filesystem-safe names.
//!
//! Task keys and service names come straight from remote trackers and may
//! contain anything. Before they become directory entries they are escaped
//! so that no entry contains a path separator or NUL and none aliases `.`
//! or `..`.

use std::collections::HashSet;

/// Escapes a backend-provided key into a single path component.
///
/// `%`, `/` and NUL are percent-encoded; the reserved components `.` and
/// `..` are encoded dot by dot. An empty key becomes `%`, which no other
/// input can produce because every escaped `%` is followed by two hex digits.
pub fn escape_name(key: &str) -> String {
    match key {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\0' => out.push_str("%00"),
            c => out.push(c),
        }
    }
    out
}

/// Hands out unique names within one directory listing.
///
/// The first holder of a name keeps it; later holders get `~2`, `~3`, ...
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    /// Creates an allocator with no names taken.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator with `names` already taken.
    pub fn with_reserved<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            taken: names.into_iter().map(str::to_string).collect(),
        }
    }

    /// Claims `name`, or the first free suffixed variant of it.
    pub fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }
        let mut n = 2u64;
        loop {
            let candidate = format!("{name}~{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_keys_unchanged() {
        assert_eq!(escape_name("taskfs@lufia#12"), "taskfs@lufia#12");
        assert_eq!(escape_name("PROJ-7"), "PROJ-7");
    }

    #[test]
    fn test_separators_escaped() {
        assert_eq!(escape_name("group/sub"), "group%2Fsub");
        assert_eq!(escape_name("100%"), "100%25");
        assert_eq!(escape_name("a\0b"), "a%00b");
        assert!(!escape_name("a/b/c").contains('/'));
    }

    #[test]
    fn test_reserved_components() {
        assert_eq!(escape_name(""), "%");
        assert_eq!(escape_name("."), "%2E");
        assert_eq!(escape_name(".."), "%2E%2E");
        assert_eq!(escape_name("..."), "...");
    }

    #[test]
    fn test_allocator_suffixes_duplicates() {
        let mut names = NameAllocator::with_reserved(["ctl"]);
        assert_eq!(names.claim("a"), "a");
        assert_eq!(names.claim("a"), "a~2");
        assert_eq!(names.claim("a"), "a~3");
        assert_eq!(names.claim("ctl"), "ctl~2");
    }

    #[test]
    fn test_allocator_skips_taken_suffix() {
        let mut names = NameAllocator::new();
        assert_eq!(names.claim("x~2"), "x~2");
        assert_eq!(names.claim("x"), "x");
        assert_eq!(names.claim("x"), "x~3");
    }
}
