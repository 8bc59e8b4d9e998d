//! File-name parsing for revisioned names.
//!
//! A revisioned name carries the fingerprint as its last stem segment:
//!
//! - `js/app.js` -> `js/app.3f2a9c1e.js`
//! - `css/site.min.css` -> `css/site.min.77ab01c2.css`
//! - `LICENSE` -> `LICENSE.5d41402a`
//!
//! Parsing recognizes an existing fingerprint segment so revisioning an
//! already revisioned tree replaces the fingerprint instead of stacking a
//! second one.

/// Result of parsing a slash-separated path like `js/app.3f2a9c1e.js`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName<'a> {
    /// Directory part including the trailing `/`. Empty at the root.
    pub dir: &'a str,
    /// Stem without the fingerprint segment.
    pub stem: &'a str,
    /// Fingerprint segment if present.
    pub fingerprint: Option<&'a str>,
    /// Extension without the dot. Empty if none.
    pub extension: &'a str,
}

/// Parse a path, treating a trailing stem segment of exactly `hash_length`
/// lowercase hex digits as a fingerprint.
///
/// - `"app.js"` -> stem `app`, no fingerprint, extension `js`
/// - `"app.3f2a9c1e.js"` -> stem `app`, fingerprint `3f2a9c1e`
/// - `"3f2a9c1e.js"` -> stem `3f2a9c1e` (a name needs a stem besides the hash)
/// - `".htaccess"` -> stem `.htaccess`, no extension
/// - `"LICENSE.3f2a9c1e"` -> stem `LICENSE`, fingerprint `3f2a9c1e`, no extension
pub fn parse_name(path: &str, hash_length: usize) -> ParsedName<'_> {
    let split = path.rfind('/').map_or(0, |i| i + 1);
    let (dir, file) = path.split_at(split);
    let (stem, extension) = match file.rfind('.') {
        Some(0) | None => (file, ""),
        Some(dot) => (&file[..dot], &file[dot + 1..]),
    };
    // A name without an extension carries its fingerprint last.
    if !extension.is_empty() && is_fingerprint(extension, hash_length) {
        return ParsedName {
            dir,
            stem,
            fingerprint: Some(extension),
            extension: "",
        };
    }
    if let Some(dot) = stem.rfind('.')
        && dot > 0
        && is_fingerprint(&stem[dot + 1..], hash_length)
    {
        return ParsedName {
            dir,
            stem: &stem[..dot],
            fingerprint: Some(&stem[dot + 1..]),
            extension,
        };
    }
    ParsedName {
        dir,
        stem,
        fingerprint: None,
        extension,
    }
}

fn is_fingerprint(segment: &str, hash_length: usize) -> bool {
    segment.len() == hash_length
        && segment
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl ParsedName<'_> {
    /// The path with any fingerprint removed.
    pub fn base_path(&self) -> String {
        self.with_fingerprint(None)
    }

    /// The path carrying `fingerprint`.
    pub fn revisioned(&self, fingerprint: &str) -> String {
        self.with_fingerprint(Some(fingerprint))
    }

    fn with_fingerprint(&self, fingerprint: Option<&str>) -> String {
        let mut out = format!("{}{}", self.dir, self.stem);
        if let Some(fp) = fingerprint {
            out.push('.');
            out.push_str(fp);
        }
        if !self.extension.is_empty() {
            out.push('.');
            out.push_str(self.extension);
        }
        out
    }
}

/// Lowercased extension of a slash-separated path, without the dot.
pub fn extension_of(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rfind('.') {
        Some(dot) if dot > 0 => file[dot + 1..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Final path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
