//! Image file naming
//!
//! Screenshot names are derived from the page path; see [`screenshot_name`].

use url::Url;

const REMOVED: [&str; 6] = [".jsp", ".html", ".htm", "?wcmmode=disabled", ".pdf", ".PDF"];
const REPLACED: [char; 3] = ['#', '?', '&'];

/// Path, fragment and query of `url_or_path`, in that order
fn url_path(url_or_path: &str) -> String {
    let parsed = Url::parse(url_or_path).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(url_or_path))
    });

    let Ok(url) = parsed else {
        return url_or_path.to_string();
    };

    let mut path = url.path().to_string();
    if Url::parse(url_or_path).is_err() && !url_or_path.starts_with('/') {
        path = path.trim_start_matches('/').to_string();
    }
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        path = format!("{}#{}", path, fragment);
    }
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        path = format!("{}?{}", path, query);
    }
    path
}

/// File-system friendly name for a page.
///
/// `/products/item.html?id=3` becomes `products_item_id=3`; the site root
/// becomes `home_page`.
pub fn screenshot_name(url_or_path: &str) -> String {
    let mut name = url_path(url_or_path).replace('/', "_");

    for removed in REMOVED {
        name = name.replace(removed, "");
    }
    name = name.replace(REPLACED, "_");

    if name.is_empty() || name == "_" {
        return "home_page".to_string();
    }
    match name.strip_prefix('_') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// `base` or `base_suffix`
pub fn image_stem(base: &str, suffix: Option<&str>) -> String {
    match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{}_{}", base, suffix),
        None => base.to_string(),
    }
}

/// Suffix for the `index`-th (zero based) image of a sequence.
///
/// Named sequences count `_001`, `_002`; all others count `_1`, `_2`.
pub fn sequence_suffix(suffix: Option<&str>, index: usize, zero_padded: bool) -> String {
    let number = index + 1;
    match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) if zero_padded => format!("{}_00{}", suffix, number),
        Some(suffix) => format!("{}_{}", suffix, number),
        None => number.to_string(),
    }
}

/// Suffix carrying the `for_each` iteration, `iteration` of 0 leaves it unchanged
pub fn iteration_suffix(suffix: Option<&str>, iteration: u32) -> Option<String> {
    let suffix = suffix.filter(|s| !s.is_empty());
    if iteration == 0 {
        return suffix.map(str::to_string);
    }
    Some(match suffix {
        Some(suffix) => format!("{}_{:03}", suffix, iteration),
        None => format!("{:03}", iteration),
    })
}
