//! Locale - per-thread ambient locale
//!
//! Work handed to another thread runs under the submitter's locale, so the
//! ambient value travels with each dispatched job.

use std::cell::RefCell;
use std::env;
use std::fmt;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Locale> = RefCell::new(Locale::from_env());
}

/// Locale tag such as `en_US.UTF-8` or `C`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale(Arc<str>);

impl Locale {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(Arc::from(tag.as_ref()))
    }

    /// Locale from `LC_ALL`, `LC_MESSAGES` or `LANG`, falling back to `C`.
    pub fn from_env() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .find(|value| !value.is_empty())
            .map(Self::new)
            .unwrap_or_else(|| Self::new("C"))
    }

    pub fn tag(&self) -> &str {
        &self.0
    }

    /// Locale of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Replace the calling thread's locale, returning the previous one.
    pub fn set_current(locale: Locale) -> Locale {
        CURRENT.with(|current| current.replace(locale))
    }

    /// Install `locale` on the calling thread until the guard drops.
    pub fn scope(locale: Locale) -> LocaleGuard {
        LocaleGuard {
            previous: Some(Self::set_current(locale)),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Restores the previous locale on drop, also during unwinding.
#[must_use]
pub struct LocaleGuard {
    previous: Option<Locale>,
}

impl Drop for LocaleGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            Locale::set_current(previous);
        }
    }
}
