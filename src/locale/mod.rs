//! Locale resolution for clean-URL localized routing.
//!
//! The configured locales form a small closed set; the first one is the
//! default. The default locale never appears as a path prefix, every other
//! locale always does:
//!
//! - `/pricing` is the default-locale pricing page
//! - `/fr/pricing` is the French pricing page
//!
//! [`LocaleSet::localize_url`] is the one place that decides what a localized
//! URL looks like. The routing pipeline and link builders both call it.

use std::fmt;

/// A validated, ordered set of locale codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSet {
    locales: Vec<String>,
}

/// Error building a [`LocaleSet`] from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocaleError {
    Empty,
    Duplicate(String),
    Invalid(String),
}

impl fmt::Display for LocaleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocaleError::Empty => write!(f, "At least one locale must be configured"),
            LocaleError::Duplicate(code) => write!(f, "Duplicate locale '{}'", code),
            LocaleError::Invalid(code) => write!(
                f,
                "Invalid locale '{}': codes must be non-empty and contain no '/', '?' or '#'",
                code
            ),
        }
    }
}

impl std::error::Error for LocaleError {}

impl LocaleSet {
    /// Build a locale set; the first entry becomes the default locale.
    pub fn new<I, S>(codes: I) -> Result<Self, LocaleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut locales: Vec<String> = Vec::new();
        for code in codes {
            let code = code.into();
            if code.is_empty() || code.contains(['/', '?', '#']) {
                return Err(LocaleError::Invalid(code));
            }
            if locales.contains(&code) {
                return Err(LocaleError::Duplicate(code));
            }
            locales.push(code);
        }
        if locales.is_empty() {
            return Err(LocaleError::Empty);
        }
        Ok(Self { locales })
    }

    /// The default locale (first configured entry).
    pub fn default_locale(&self) -> &str {
        &self.locales[0]
    }

    /// All configured locales in configuration order.
    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    pub fn is_default(&self, locale: &str) -> bool {
        self.default_locale() == locale
    }

    /// Exact membership test.
    pub fn is_valid_locale(&self, candidate: &str) -> bool {
        self.locales.iter().any(|l| l == candidate)
    }

    /// Locale named by the first path segment, if it is a configured locale.
    ///
    /// Query strings and fragments are ignored.
    pub fn locale_from_path(&self, path: &str) -> Option<&str> {
        let first = path_part(path)
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or("");
        self.locales
            .iter()
            .find(|l| l.as_str() == first)
            .map(String::as_str)
    }

    /// Locale a path is served in: its prefix locale, or the default.
    pub fn effective_locale<'a>(&'a self, path: &str) -> &'a str {
        self.locale_from_path(path)
            .unwrap_or_else(|| self.default_locale())
    }

    /// Remove a leading `/{locale}` segment from `path`.
    ///
    /// Only a whole segment is removed (`/fr/x` loses `/fr`, `/fresh` does
    /// not). Returns `/` when nothing remains.
    pub fn strip_locale_from_path(path: &str, locale: &str) -> String {
        let prefix = format!("/{}", locale);
        let rest = match path.strip_prefix(&prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with(['/', '?', '#']) => rest,
            _ => return path.to_string(),
        };
        if rest.is_empty() {
            "/".to_string()
        } else if rest.starts_with('/') {
            rest.to_string()
        } else {
            // "/fr?x=1" keeps its query on the root path
            format!("/{}", rest)
        }
    }

    /// Prepend `/{locale}` unconditionally (internal rewrites).
    pub fn with_locale_prefix(path: &str, locale: &str) -> String {
        if path == "/" || path.is_empty() {
            format!("/{}", locale)
        } else if path.starts_with(['?', '#']) {
            format!("/{}{}", locale, path)
        } else if path.starts_with('/') {
            format!("/{}{}", locale, path)
        } else {
            format!("/{}/{}", locale, path)
        }
    }

    /// Localize a site URL for `locale`.
    ///
    /// - external URLs (`https:`, `mailto:`, `tel:`, `//host`) and fragment-only
    ///   links pass through unchanged
    /// - root maps to `/` for the default locale and `/{locale}` otherwise
    /// - any existing configured-locale prefix is replaced, then `/{locale}` is
    ///   prepended unless `locale` is the default
    ///
    /// Applying it twice with the same locale yields the same URL.
    pub fn localize_url(&self, url: &str, locale: &str) -> String {
        if is_external_url(url) || url.starts_with('#') || !url.starts_with('/') {
            return url.to_string();
        }

        let unprefixed = match self.locale_from_path(url) {
            Some(existing) => Self::strip_locale_from_path(url, existing),
            None => url.to_string(),
        };

        if self.is_default(locale) {
            unprefixed
        } else {
            Self::with_locale_prefix(&unprefixed, locale)
        }
    }
}

/// True for scheme-prefixed (`https:`, `mailto:`, `tel:`) and
/// protocol-relative (`//host`) URLs.
pub fn is_external_url(url: &str) -> bool {
    if url.starts_with("//") {
        return true;
    }
    match url.find(':') {
        Some(idx) if idx > 0 => {
            let scheme = &url[..idx];
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn path_part(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or("")
}
