use hex::ToHex;
use sha2::Digest;
use url::Url;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hasher.finalize().encode_hex::<String>()
}

/// Query parameters that only identify the click, not the document.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src",
];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Canonical identity key for URL deduplication.
///
/// Two URLs share a key iff host (lowercased, leading `www.` removed), port,
/// trimmed path, and sorted tracking-free query match. The scheme is folded
/// to `https` so `http`/`https` variants of the same document collapse; the
/// fragment is dropped. Non-http(s) or unparseable input yields `None`.
pub fn canonical_url_key(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }

    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        path.push('/');
    }

    let mut pairs = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    pairs.sort();

    let mut key = String::from("https://");
    key.push_str(host);
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(&path);
    if !pairs.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        key.push('?');
        key.push_str(&query);
    }

    Some(key)
}
