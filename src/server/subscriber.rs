use std::fmt;

/// Interest of one cache entry in one tracked resource.
///
/// Identity is structural: two subscribers with the same key and resource
/// are the same registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscriber {
    key: String,
    resource: String,
}

impl Subscriber {
    pub fn new(
        key: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            resource: resource.into(),
        }
    }

    /// Cache key that will be invalidated
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resource (table) name the key depends on
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Case-insensitive resource comparison used by dispatch.
    pub fn is_interested_in(
        &self,
        resource: &str,
    ) -> bool {
        resource_matches(&self.resource, resource)
    }
}

impl fmt::Display for Subscriber {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.resource)
    }
}

pub(crate) fn resource_matches(
    a: &str,
    b: &str,
) -> bool {
    if a.is_ascii() && b.is_ascii() {
        a.eq_ignore_ascii_case(b)
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}
