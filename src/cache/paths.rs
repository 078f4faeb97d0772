use std::path::PathBuf;

use url::Url;

const FALLBACK_HOST: &str = "site";
const INDEX_FILE: &str = "index.html";

/// Location of the cache file for `url`, relative to the cache root.
///
/// Query strings and fragments do not take part in the mapping, and dot segments are
/// dropped so a crafted URL cannot climb out of its host directory.
pub fn relative_path_for(url: &Url) -> PathBuf {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .unwrap_or(FALLBACK_HOST);

    let mut path = PathBuf::from(host);
    if let Some(segments) = url.path_segments() {
        for segment in segments.filter(|s| !s.is_empty() && *s != "." && *s != "..") {
            path.push(segment);
        }
    }
    path.push(INDEX_FILE);
    path
}
