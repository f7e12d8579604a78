//! Scoped cache keys
//!
//! Every cache entry a repository touches is addressed as
//! `"{type_name}-{raw}"`, so two document types can never collide on the
//! same raw key and a whole type can be flushed by prefix.

use crate::cache::types::CacheKey;

/// Key under which `raw` is stored for documents of `type_name`
pub fn scoped_key(type_name: &str, raw: &str) -> CacheKey {
    let mut key = String::with_capacity(type_name.len() + 1 + raw.len());
    key.push_str(type_name);
    key.push('-');
    key.push_str(raw);
    key
}

/// Prefix shared by every key of `type_name`
pub fn type_prefix(type_name: &str) -> String {
    format!("{}-", type_name)
}

/// Raw key of a cached `count` for the given find cache key
pub fn count_key(raw: &str) -> String {
    format!("count-{}", raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scoped_key_format() {
        assert_eq!(scoped_key("Stack", "abc"), "Stack-abc");
        assert_eq!(scoped_key("Stack", ""), "Stack-");
        assert_eq!(count_key("open"), "count-open");
        assert!(scoped_key("Stack", "abc").starts_with(&type_prefix("Stack")));
    }

    proptest! {
        #[test]
        fn scoped_key_is_type_name_dash_raw(type_name in "[A-Za-z]{1,16}", raw in ".{0,32}") {
            prop_assert_eq!(scoped_key(&type_name, &raw), format!("{}-{}", type_name, raw));
        }

        #[test]
        fn distinct_types_never_share_a_key(
            a in "[A-Za-z]{1,16}",
            b in "[A-Za-z]{1,16}",
            raw in "[a-f0-9]{0,24}",
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(scoped_key(&a, &raw), scoped_key(&b, &raw));
        }

        #[test]
        fn scoped_key_is_deterministic(type_name in "[A-Za-z]{1,16}", raw in ".{0,32}") {
            prop_assert_eq!(scoped_key(&type_name, &raw), scoped_key(&type_name, &raw));
        }
    }
}
