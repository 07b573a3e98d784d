//! Slug and file-name utilities
//!
//! Pure functions used on both sides of the store boundary:
//! - [`slug_from_name`] / [`unique_slug`] derive collision-free folder slugs
//! - [`unique_file_name`] disambiguates upload names with ` (1)`, ` (2)`, ...
//! - [`preserve_extension`] applies the rename extension rule

use std::collections::HashSet;

/// Slug used when a name contains no URL-safe characters at all
const FALLBACK_SLUG: &str = "folder";

/// Derives a URL-safe slug from a display name.
///
/// Lowercases ASCII alphanumerics, turns every other run of characters
/// into a single `-`, and trims dashes from both ends.
///
/// ```
/// use dataroom_core::domain::naming::slug_from_name;
///
/// assert_eq!(slug_from_name("Q3 Financials (Draft)"), "q3-financials-draft");
/// ```
pub fn slug_from_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Returns `base` if it is free among `siblings`, otherwise the first of
/// `base-1`, `base-2`, ... that is.
///
/// Terminates because `siblings` is finite: at most `siblings.len() + 1`
/// candidates are tried.
pub fn unique_slug<S: AsRef<str>>(base: &str, siblings: &[S]) -> String {
    let taken: HashSet<&str> = siblings.iter().map(AsRef::as_ref).collect();
    if !taken.contains(base) {
        return base.to_string();
    }

    let mut n = 1usize;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

/// Splits a file name into `(stem, extension)` at the last dot.
///
/// The extension includes the dot. Leading-dot names such as `.env` and
/// names ending in a dot have no extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], Some(&name[pos..])),
        _ => (name, None),
    }
}

/// Claims a name in `taken` (compared case-insensitively), appending
/// ` (1)`, ` (2)`, ... before the extension until it is free.
///
/// `taken` holds lowercased names and is updated with the claimed one, so
/// successive calls resolve collisions within a batch as well.
pub fn unique_file_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_lowercase()) {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    let ext = ext.unwrap_or("");
    let mut n = 1usize;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

/// Applies the rename extension rule.
///
/// If `new_name` has no extension and `old_name` has one, the old extension
/// is appended; otherwise `new_name` is returned unchanged.
pub fn preserve_extension(old_name: &str, new_name: &str) -> String {
    let new_name = new_name.trim();
    match (split_extension(old_name).1, split_extension(new_name).1) {
        (Some(old_ext), None) => format!("{new_name}{old_ext}"),
        _ => new_name.to_string(),
    }
}
