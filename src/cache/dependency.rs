use std::fmt;
use std::sync::Arc;

use crate::store::KeyEvent;

/// One-shot handler receiving the invalidated key and the event that
/// triggered it.
pub type KeyCallback = Arc<dyn Fn(&str, KeyEvent) + Send + Sync>;

/// Ties a cache entry's lifetime to changes of a named resource.
#[derive(Clone)]
pub struct ChangeDependency {
    resource_name: String,
    on_invalidated: KeyCallback,
}

impl ChangeDependency {
    pub fn new<F>(
        resource_name: impl Into<String>,
        on_invalidated: F,
    ) -> Self
    where
        F: Fn(&str, KeyEvent) + Send + Sync + 'static,
    {
        Self {
            resource_name: resource_name.into(),
            on_invalidated: Arc::new(on_invalidated),
        }
    }

    /// Dependency whose invalidation needs no callback.
    pub fn on(resource_name: impl Into<String>) -> Self {
        Self::new(resource_name, |_, _| {})
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub(crate) fn callback(&self) -> KeyCallback {
        self.on_invalidated.clone()
    }
}

impl fmt::Debug for ChangeDependency {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ChangeDependency")
            .field("resource_name", &self.resource_name)
            .finish_non_exhaustive()
    }
}
