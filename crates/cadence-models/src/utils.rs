//! Asset location helpers shared by the engine and the store.

use url::Url;

/// Path marker used by public storage URLs.
const PUBLIC_OBJECT_MARKER: &str = "/storage/v1/object/public/";

/// Resolve an asset location to a relative storage path.
///
/// Public storage URLs resolve to the part after the public-object marker
/// (bucket and key). Any other URL resolves to its path. Returns `None` for
/// empty or unparsable locations.
pub fn resolve_storage_path(asset_url: &str) -> Option<String> {
    let asset_url = asset_url.trim();
    if asset_url.is_empty() {
        return None;
    }

    let parsed = Url::parse(asset_url).ok()?;
    let path = parsed.path();
    let relative = match path.split_once(PUBLIC_OBJECT_MARKER) {
        Some((_, rest)) => rest,
        None => path,
    };

    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        None
    } else {
        Some(relative.to_string())
    }
}

/// Deduplication key for a video stored at `storage_path`.
pub fn storage_source_id(storage_path: &str) -> String {
    format!("storage:{}", storage_path)
}
