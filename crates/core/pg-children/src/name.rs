//! Generator-produced database names
//!
//! `CREATE DATABASE` and `DROP DATABASE` cannot take the database name as a bound parameter, so
//! the only names ever interpolated into those statements are [`SafeName`]s. A [`SafeName`] can
//! only be built by a [`SafeNameGenerator`] and is restricted to `[a-z0-9_]` by construction:
//! a fixed literal prefix followed by numeric components.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Literal prefix of every temporary database name
pub const TEMP_NAME_PREFIX: &str = "__tmp";

/// A database name that is safe to interpolate directly into a catalog statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeName(String);

impl SafeName {
    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SafeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces temporary database names of the form `__tmp_<pid>_<millis>_<counter>`.
///
/// The counter belongs to the generator instance and is advanced with one atomic `fetch_add`;
/// concurrent callers of the same instance never observe the same value. The process id keeps
/// names apart across test processes sharing a server.
#[derive(Debug, Default)]
pub struct SafeNameGenerator {
    counter: AtomicU64,
}

impl SafeNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the next temporary name.
    pub fn next(&self) -> SafeName {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();

        let name = format!("{TEMP_NAME_PREFIX}_{}_{millis}_{id}", std::process::id());
        debug_assert!(is_safe(&name), "generated name must stay in the safe alphabet");
        SafeName(name)
    }
}

/// Whether `name` only contains ASCII lowercase letters, digits and underscores.
pub fn is_safe(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    #[test]
    fn next_produces_safe_prefixed_names() {
        //* Given
        let generator = SafeNameGenerator::new();

        //* When
        let name = generator.next();

        //* Then
        assert!(is_safe(name.as_str()), "unsafe name: {name}");
        assert!(name.as_str().starts_with("__tmp_"));
        assert!(
            name.as_str().len() <= crate::MAX_DATABASE_NAME_LEN,
            "name exceeds identifier limit: {name}"
        );
    }

    #[test]
    fn next_embeds_process_id_and_counter() {
        //* Given
        let generator = SafeNameGenerator::new();
        let pid = std::process::id().to_string();

        //* When
        let first = generator.next();
        let second = generator.next();

        //* Then
        let parts: Vec<_> = first.as_str().trim_start_matches("__tmp_").split('_').collect();
        assert_eq!(parts.len(), 3, "unexpected layout: {first}");
        assert_eq!(parts[0], pid);
        assert_eq!(parts[2], "0");
        assert!(second.as_str().ends_with("_1"), "counter did not advance: {second}");
    }

    #[test]
    fn concurrent_generation_yields_distinct_names() {
        //* Given
        let generator = Arc::new(SafeNameGenerator::new());

        //* When
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..250).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();
        let names: Vec<SafeName> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("generator thread panicked"))
            .collect();

        //* Then
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len(), "duplicate temporary names generated");
    }

    #[test]
    fn is_safe_rejects_untrusted_characters() {
        assert!(is_safe("child_0"));
        assert!(!is_safe(""));
        assert!(!is_safe("Child"));
        assert!(!is_safe("child; DROP DATABASE postgres"));
        assert!(!is_safe("child\"0"));
        assert!(!is_safe("child-0"));
    }
}
