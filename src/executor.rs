use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::Result;

/// Worker pool that runs fragment producers and writer lanes.
pub trait Executor: Send + Sync + 'static {
    /// Runs `future` to completion in the background.
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Resolves the executor for a pipeline run, defaulting to the ambient tokio runtime.
pub(crate) fn resolve(executor: Option<&Arc<dyn Executor>>) -> Result<Arc<dyn Executor>> {
    match executor {
        Some(executor) => Ok(Arc::clone(executor)),
        None => Ok(Arc::new(tokio::TokioExecutor::current()?)),
    }
}

/// Executor backed by a tokio runtime handle.
pub mod tokio {
    use futures_util::future::BoxFuture;
    use tokio::runtime::Handle;

    use super::Executor;
    use crate::error::{DatasetError, Result};

    /// Spawns pipeline tasks onto a tokio runtime.
    #[derive(Clone, Debug)]
    pub struct TokioExecutor {
        handle: Handle,
    }

    impl TokioExecutor {
        /// Executor spawning onto `handle`.
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }

        /// Executor bound to the runtime of the calling task.
        pub fn current() -> Result<Self> {
            let handle = Handle::try_current().map_err(|_| {
                DatasetError::not_supported("threaded execution requires a tokio runtime")
            })?;
            Ok(Self { handle })
        }
    }

    impl Executor for TokioExecutor {
        fn spawn(&self, future: BoxFuture<'static, ()>) {
            self.handle.spawn(future);
        }
    }
}
