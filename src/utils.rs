use crate::cache::CacheDomain;

/// Build a cache key following the `<domain>:<operation>:<sorted-param-pairs>`
/// convention, e.g. `channels:list:exclude_archived:true|limit:100`.
pub fn cache_key(domain: CacheDomain, operation: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return format!("{}:{}", domain, operation);
    }

    let mut pairs: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect();
    pairs.sort();

    format!("{}:{}:{}", domain, operation, pairs.join("|"))
}

/// Infer the owning cache from a key's `<domain>:` prefix.
pub fn domain_for_key(key: &str) -> Option<CacheDomain> {
    key.split(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_cache_key_sorts_params() {
        let key = cache_key(
            CacheDomain::Channels,
            "list",
            &[("limit", "100"), ("exclude_archived", "true")],
        );
        assert_eq!(key, "channels:list:exclude_archived:true|limit:100");
    }

    #[test]
    fn test_cache_key_without_params() {
        assert_eq!(cache_key(CacheDomain::Users, "list", &[]), "users:list");
    }

    #[rstest]
    #[case("threads:replies:C1:1724680000.000100", Some(CacheDomain::Threads))]
    #[case("search:query:deploy", Some(CacheDomain::Search))]
    #[case("files:info:F1", Some(CacheDomain::Files))]
    #[case("reactions:list:C1", None)]
    #[case("no-colon-at-all", None)]
    fn test_domain_for_key(#[case] key: &str, #[case] expected: Option<CacheDomain>) {
        assert_eq!(domain_for_key(key), expected);
    }
}
