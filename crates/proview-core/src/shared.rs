//! Process-wide, lazily-initialized shared handles.
//!
//! The embedding model and the LLM client are expensive to construct and
//! read-only afterwards. A `SharedHandle` builds its value on first use,
//! exactly once even under concurrent first calls, and hands out `Arc`
//! clones from then on.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::error::Result;

type Initializer<T> = Box<dyn Fn() -> Result<Arc<T>> + Send + Sync>;

/// A value created once on first access and shared thereafter.
///
/// A failed initialization is not cached: the next call retries it.
pub struct SharedHandle<T: ?Sized + Send + Sync> {
    name: &'static str,
    cell: OnceCell<Arc<T>>,
    init: Initializer<T>,
}

impl<T: ?Sized + Send + Sync> SharedHandle<T> {
    /// Create a handle whose value is built by `init` on first access.
    pub fn lazy<F>(name: &'static str, init: F) -> Self
    where
        F: Fn() -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            name,
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// Create a handle that is already initialized.
    pub fn ready(name: &'static str, value: Arc<T>) -> Self {
        Self {
            name,
            cell: OnceCell::new_with(Some(value)),
            init: Box::new(|| {
                Err(crate::error::ProviewError::Config(
                    "shared handle initializer called on a ready handle".to_string(),
                ))
            }),
        }
    }

    /// Get the shared value, initializing it if this is the first call.
    pub async fn get(&self) -> Result<Arc<T>> {
        let value = self
            .cell
            .get_or_try_init(|| async {
                let value = (self.init)()?;
                info!(handle = self.name, "Shared handle initialized");
                Ok::<_, crate::error::ProviewError>(value)
            })
            .await?;
        Ok(Arc::clone(value))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: ?Sized + Send + Sync> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
