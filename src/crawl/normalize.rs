use url::Url;

/// Canonicalize a URL for deduplication and cache keys.
///
/// Lowercases scheme and host, strips default ports and the fragment,
/// defaults an empty path to `/`, removes a trailing slash everywhere but
/// the root, and optionally drops the query string. Invalid input is
/// returned lowercased so callers can still use it as an opaque key.
pub fn normalize(url: &str, ignore_query: bool) -> String {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return url.trim().to_ascii_lowercase();
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();

    // `url` strips default ports itself, but only for known schemes; keep an
    // explicit guard so http://host:80 and https://host:443 collapse.
    let port = match (parsed.port(), scheme.as_str()) {
        (Some(80), "http") | (Some(443), "https") | (None, _) => None,
        (p, _) => p,
    };

    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    } else if path != "/" && path.ends_with('/') {
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
    }

    let mut out = format!("{scheme}://{host}");
    if let Some(p) = port {
        out.push(':');
        out.push_str(&p.to_string());
    }
    out.push_str(&path);
    if !ignore_query {
        if let Some(q) = parsed.query() {
            if !q.is_empty() {
                out.push('?');
                out.push_str(q);
            }
        }
    }
    out
}

/// A URL is crawlable iff it parses, the scheme is http(s), and a host is
/// present.
pub fn is_valid(url: &str) -> bool {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().map(|h| !h.is_empty()).unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// Lowercased host component, empty when the URL does not parse.
pub fn domain_of(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Domain equality, optionally extended by the subdomain rule:
/// `a` is a subdomain of `b` iff `a == b` or `a` ends with `"." + b`.
pub fn same_domain(a: &str, b: &str, allow_subdomains: bool) -> bool {
    let da = domain_of(a);
    let db = domain_of(b);
    if da.is_empty() || db.is_empty() {
        return false;
    }
    if da == db {
        return true;
    }
    if allow_subdomains {
        return da.ends_with(&format!(".{db}")) || db.ends_with(&format!(".{da}"));
    }
    false
}

/// Resolve `href` against `base`, keeping only http(s) results and skipping
/// pseudo-links (`javascript:`, `mailto:`, fragments, ...).
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }
    let base = Url::parse(base).ok()?;
    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let cases = [
            "HTTPS://Example.COM:443/Path/?b=2&a=1#frag",
            "http://example.com:80/",
            "https://example.com/docs/",
            "https://example.com",
            "https://example.com/a//b/",
        ];
        for case in cases {
            let once = normalize(case, false);
            let twice = normalize(&once, false);
            assert_eq!(once, twice, "normalize must be idempotent for {case}");
        }
    }

    #[test]
    fn strips_default_ports_and_fragment() {
        assert_eq!(
            normalize("HTTPS://Example.COM:443/Page#section", false),
            "https://example.com/Page"
        );
        assert_eq!(
            normalize("http://example.com:80", false),
            "http://example.com/"
        );
        assert_eq!(
            normalize("http://example.com:8080/x", false),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn trailing_slash_stripped_except_root() {
        assert_eq!(normalize("https://example.com/", false), "https://example.com/");
        assert_eq!(
            normalize("https://example.com/docs/", false),
            "https://example.com/docs"
        );
    }

    #[test]
    fn query_handling() {
        assert_eq!(
            normalize("https://example.com/p?x=1", false),
            "https://example.com/p?x=1"
        );
        assert_eq!(
            normalize("https://example.com/p?x=1", true),
            "https://example.com/p"
        );
    }

    #[test]
    fn validity() {
        assert!(is_valid("https://example.com"));
        assert!(is_valid("http://example.com/path"));
        assert!(!is_valid("ftp://example.com"));
        assert!(!is_valid("not a url"));
        assert!(!is_valid("https://"));
        // Validity survives normalization.
        for u in ["https://Example.com:443/a/", "http://h/p?q=1#f"] {
            assert!(is_valid(&normalize(u, false)));
        }
    }

    #[test]
    fn same_domain_rules() {
        let a = "https://docs.example.com/guide";
        let b = "https://example.com/";
        assert!(same_domain(a, a, false));
        assert!(!same_domain(a, b, false));
        assert!(same_domain(a, b, true));
        assert!(!same_domain(
            "https://notexample.com/",
            "https://example.com/",
            true
        ));
    }

    #[test]
    fn resolve_filters_pseudo_links() {
        let base = "https://example.com/dir/page";
        assert_eq!(
            resolve(base, "../other").as_deref(),
            Some("https://example.com/other")
        );
        assert!(resolve(base, "javascript:void(0)").is_none());
        assert!(resolve(base, "mailto:x@example.com").is_none());
        assert!(resolve(base, "#anchor").is_none());
        assert!(resolve(base, "ftp://example.com/f").is_none());
    }
}
