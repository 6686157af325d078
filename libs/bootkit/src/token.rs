//! Registry keys.
//!
//! A [`Token`] is an opaque identity: two tokens are equal only when they name the same
//! type, the same string key, or were produced by the same [`Token::unique`] call.
//! The human-readable parts exist for diagnostics only.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

/// Registry key: a type, an arbitrary string, or a process-unique value.
#[derive(Clone)]
pub enum Token {
    Type { id: TypeId, name: &'static str },
    Named(Arc<str>),
    Unique { id: u64, label: Arc<str> },
}

impl Token {
    /// Token identifying the type `T` (works for `T = dyn Trait`).
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Token::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Token keyed by an arbitrary string.
    #[inline]
    #[must_use]
    pub fn named(key: impl Into<Arc<str>>) -> Self {
        Token::Named(key.into())
    }

    /// A fresh token that compares equal only to its own clones.
    #[must_use]
    pub fn unique(label: impl Into<Arc<str>>) -> Self {
        Token::Unique {
            id: NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    /// Short display name (type path without module prefix, or the key/label).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Token::Type { name, .. } => short_type_name(name),
            Token::Named(key) => key,
            Token::Unique { label, .. } => label,
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Token::Type { id: a, .. }, Token::Type { id: b, .. }) => a == b,
            (Token::Named(a), Token::Named(b)) => a == b,
            (Token::Unique { id: a, .. }, Token::Unique { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Token::Type { id, .. } => id.hash(state),
            Token::Named(key) => key.hash(state),
            Token::Unique { id, .. } => id.hash(state),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Type { name, .. } => f.write_str(name),
            Token::Named(key) => write!(f, "named:{key}"),
            Token::Unique { id, label } => write!(f, "unique:{label}#{id}"),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Strip the module path (and generic arguments' paths) from a `type_name` output.
///
/// `my_app::modules::Greeter` becomes `Greeter`; `dyn my_app::Api` becomes `Api`.
#[must_use]
pub fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    let base = base.strip_prefix("dyn ").unwrap_or(base);
    base.rsplit("::").next().unwrap_or(base)
}
