use regex::Regex;
use wildmatch::WildMatch;

/// Compiled URL filter of a wildcard rule
///
/// Syntax:
/// - `*` matches any run of characters
/// - `^` matches one separator character (anything except a letter, digit,
///   `_ - . %`) or the end of the URL
/// - a leading `|` anchors at the start of the URL, a trailing `|` at its end
/// - a leading `||` anchors at the start of the host or of any of its labels
///
/// Matching is case-insensitive. Filters without anchors or separators
/// are plain substring globs.
#[derive(Debug, Clone)]
pub enum UrlFilter {
    Glob(WildMatch),
    Pattern(Regex),
}

impl UrlFilter {
    /// Compile a filter
    pub fn new(filter: &str) -> Result<Self, regex::Error> {
        let filter = filter.to_lowercase();
        let plain = !filter.contains(&['|', '^', '?'][..]);
        if plain {
            let glob = format!("*{}*", filter);
            return Ok(UrlFilter::Glob(WildMatch::new(&glob)));
        }

        let (prefix, body) = if let Some(rest) = filter.strip_prefix("||") {
            (r"^[a-z][a-z0-9+.\-]*://(?:[^/?#]*\.)?", rest)
        } else if let Some(rest) = filter.strip_prefix('|') {
            ("^", rest)
        } else {
            ("", filter.as_str())
        };
        let (body, suffix) = match body.strip_suffix('|') {
            Some(rest) => (rest, "$"),
            None => (body, ""),
        };

        let mut pattern = String::from(prefix);
        for ch in body.chars() {
            match ch {
                '*' => pattern.push_str(".*"),
                '^' => pattern.push_str(r"(?:[^a-z0-9_\-.%]|$)"),
                _ => pattern.push_str(&regex::escape(&ch.to_string())),
            }
        }
        pattern.push_str(suffix);

        Ok(UrlFilter::Pattern(Regex::new(&pattern)?))
    }

    /// Check if a URL matches the filter
    pub fn matches(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        match self {
            UrlFilter::Glob(glob) => glob.matches(&url),
            UrlFilter::Pattern(regex) => regex.is_match(&url),
        }
    }
}
