//! Thread-local cache of compiled ast-grep patterns.
//!
//! Rules re-run the same patterns on every pipeline iteration of every
//! file, so compiled patterns are kept per worker thread. The cache is
//! cleared wholesale once it reaches capacity.

use ast_grep_core::Pattern;
use ast_grep_language::SupportLang;
use std::cell::RefCell;
use std::collections::HashMap;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Keyed by language too: the same pattern text means different things
    // in different grammars.
    static PATTERN_CACHE: RefCell<HashMap<String, Pattern>> =
        RefCell::new(HashMap::new());
}

/// Get a compiled pattern from cache, or compile and cache it.
pub fn get_or_compile(pattern: &str, lang: SupportLang) -> Pattern {
    PATTERN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let key = format!("{lang:?}:{pattern}");

        if let Some(compiled) = cache.get(&key) {
            return compiled.clone();
        }

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }

        let compiled = Pattern::new(pattern, lang);
        cache.insert(key, compiled.clone());
        compiled
    })
}

pub fn cache_size() -> usize {
    PATTERN_CACHE.with(|cache| cache.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pattern_is_cached_once() {
        let before = cache_size();
        get_or_compile("$A == true", SupportLang::Rust);
        get_or_compile("$A == true", SupportLang::Rust);
        assert_eq!(cache_size(), before + 1);
    }
}
