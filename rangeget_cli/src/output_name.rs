use std::path::PathBuf;

use url::Url;

/// Derives a local file name from the last path segment of `link`.
///
/// The query string is not part of the name. Returns `None` when the URL is
/// unparseable or its path ends without a file name (e.g. `https://host/`).
pub fn output_name_from_url(link: &str) -> Option<PathBuf> {
    let parsed = Url::parse(link).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(PathBuf::from(name))
}
