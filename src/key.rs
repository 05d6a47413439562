use std::fmt;
use std::sync::Arc;

/// Cache and dedupe key. The lookup kind is part of the key itself, so a
/// hostname and an address with the same text never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Forward lookup: host -> addresses.
    Host(Arc<str>),
    /// Reverse lookup: address -> names.
    Addr(Arc<str>),
}

impl CacheKey {
    #[inline]
    pub fn host(host: &str) -> Self {
        CacheKey::Host(Arc::from(host))
    }

    #[inline]
    pub fn addr(addr: &str) -> Self {
        CacheKey::Addr(Arc::from(addr))
    }

    #[inline]
    pub fn subject(&self) -> &str {
        match self {
            CacheKey::Host(s) | CacheKey::Addr(s) => s,
        }
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::Host(_) => "host",
            CacheKey::Addr(_) => "addr",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.subject())
    }
}
