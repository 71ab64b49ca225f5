//! Key grammar, timestamp codec, and domain extraction helpers.

use chrono::{DateTime, NaiveDateTime, Utc};
use url::{Host, Url};

use crate::error::Error;

/// Timestamps embedded in request keys: ISO 8601 with colons replaced by
/// dashes so they survive inside a colon-delimited key.
const KEY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6f";

/// Prefix shared by every key this crate writes.
pub(crate) const KEY_PREFIX: &str = "scrape_proxy";

/// Pattern matching every request-timestamp key across all domains and
/// proxies, used by the pool-wide sweep.
pub(crate) const ALL_REQUEST_KEYS_PATTERN: &str = "scrape_proxy:*requests*";

pub(crate) fn encode_key_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(KEY_TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn decode_key_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, KEY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Key holding one request-timestamp record.
pub(crate) fn request_key(domain: &str, proxy: &str, ts: DateTime<Utc>) -> String {
    format!(
        "{KEY_PREFIX}:{domain}:{proxy}:requests:{}",
        encode_key_timestamp(ts)
    )
}

/// Pattern matching all live request records for one (domain, proxy) pair.
pub(crate) fn request_key_pattern(domain: &str, proxy: &str) -> String {
    format!("{KEY_PREFIX}:{domain}:{proxy}:requests:*")
}

/// Key holding the status-code log for one (domain, proxy) pair.
pub(crate) fn status_codes_key(domain: &str, proxy: &str) -> String {
    format!("{KEY_PREFIX}:{domain}:{proxy}:status_codes")
}

/// Pull the embedded timestamp back out of a request key.
///
/// The timestamp is always the final colon-delimited segment (its own colons
/// were rewritten as dashes when the key was built).
pub(crate) fn timestamp_from_request_key(key: &str) -> Option<DateTime<Utc>> {
    key.rsplit(':').next().and_then(decode_key_timestamp)
}

/// Normalize a configured proxy endpoint to a scheme-qualified URL.
pub(crate) fn normalize_proxy_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Render a proxy URL safe for embedding in a colon-delimited key: strip the
/// scheme, then rewrite the remaining colons (port separator) as underscores.
pub(crate) fn key_safe_proxy(url: &str) -> String {
    let without_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    without_scheme.replace(':', "_")
}

/// Derive the registrable-domain label of a URL via the public suffix list.
///
/// `https://sub.example.co.uk/x` yields `example`. IP-address hosts fall back
/// to the literal address (IPv6 colons rewritten for key safety).
pub(crate) fn registrable_domain(url: &str) -> Result<String, Error> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.host() {
        Some(Host::Domain(host)) => {
            let registrable = psl::domain_str(host).unwrap_or(host);
            let label = registrable.split('.').next().unwrap_or(registrable);
            Ok(label.to_ascii_lowercase())
        }
        Some(ip) => Ok(ip.to_string().replace(':', "_")),
        None => Err(Error::InvalidUrl(format!("{url}: no host"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_timestamp_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 12, 30, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        let encoded = encode_key_timestamp(ts);
        assert!(!encoded.contains(':'));
        assert_eq!(decode_key_timestamp(&encoded), Some(ts));
    }

    #[test]
    fn request_key_embeds_parseable_timestamp() {
        let ts = Utc::now();
        let key = request_key("example", "1.2.3.4_8080", ts);
        assert!(key.starts_with("scrape_proxy:example:1.2.3.4_8080:requests:"));
        let parsed = timestamp_from_request_key(&key).unwrap();
        assert!((parsed - ts).num_microseconds().unwrap().abs() < 2);
    }

    #[test]
    fn proxy_normalization() {
        assert_eq!(normalize_proxy_url("1.2.3.4:8080"), "http://1.2.3.4:8080");
        assert_eq!(normalize_proxy_url("http://1.2.3.4:8080"), "http://1.2.3.4:8080");
        assert_eq!(normalize_proxy_url("socks5://1.2.3.4:1080"), "socks5://1.2.3.4:1080");
    }

    #[test]
    fn key_safe_proxy_strips_scheme_and_colons() {
        assert_eq!(key_safe_proxy("http://1.2.3.4:8080"), "1.2.3.4_8080");
        assert_eq!(key_safe_proxy("1.2.3.4:8080"), "1.2.3.4_8080");
    }

    #[test]
    fn registrable_domain_uses_public_suffix_list() {
        assert_eq!(registrable_domain("http://sub.example.co.uk/x").unwrap(), "example");
        assert_eq!(registrable_domain("https://www.example.com").unwrap(), "example");
        assert_eq!(registrable_domain("http://192.168.1.1:9000/a").unwrap(), "192.168.1.1");
    }

    #[test]
    fn registrable_domain_rejects_hostless_urls() {
        assert!(matches!(
            registrable_domain("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }
}
