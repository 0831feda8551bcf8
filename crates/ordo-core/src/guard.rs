//! Interruption handling
//!
//! [`InterruptGuard::run`] races a pipeline future against an interruption
//! future. Whichever way the run ends early, the address cache is written to
//! disk before control returns, so every confirmed deployment survives.

use std::future::Future;

use crate::cache::SharedAddressCache;
use crate::error::Result;

/// How a guarded pipeline ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    Completed(T),
    Interrupted,
}

impl<T> GuardOutcome<T> {
    #[inline]
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Process exit status for this outcome
    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(_) => 0,
            Self::Interrupted => 1,
        }
    }
}

/// Flushes the address cache when a pipeline is interrupted or fails
#[derive(Debug, Clone)]
pub struct InterruptGuard {
    cache: SharedAddressCache,
}

impl InterruptGuard {
    #[must_use]
    pub fn new(cache: SharedAddressCache) -> Self {
        Self { cache }
    }

    /// Run `pipeline` until it finishes or `interrupt` resolves
    ///
    /// # Errors
    /// Returns the pipeline's error after flushing the cache, or the flush
    /// error itself when the interrupted state cannot be written
    pub async fn run<T, P, I>(&self, pipeline: P, interrupt: I) -> Result<GuardOutcome<T>>
    where
        P: Future<Output = Result<T>>,
        I: Future<Output = ()>,
    {
        tokio::select! {
            result = pipeline => match result {
                Ok(value) => Ok(GuardOutcome::Completed(value)),
                Err(e) => {
                    tracing::error!("Run failed ({}): {}", e.kind(), e);
                    if let Err(flush) = self.cache.flush() {
                        tracing::error!("Cannot flush address cache: {}", flush);
                    }
                    Err(e)
                }
            },
            () = interrupt => {
                tracing::warn!("Interrupted, saving address cache to {}", self.cache.path().display());
                self.cache.flush()?;
                Ok(GuardOutcome::Interrupted)
            }
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                tracing::info!("Received TERM signal");
            }
            Err(e) => {
                tracing::error!("Cannot listen for TERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AddressCache;
    use crate::error::OrchestratorError;
    use ordo_artifact::Address;

    fn guard() -> (tempfile::TempDir, SharedAddressCache, InterruptGuard) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedAddressCache::new(AddressCache::new(), dir.path().join("deploy-cache.json"));
        let guard = InterruptGuard::new(cache.clone());
        (dir, cache, guard)
    }

    #[tokio::test]
    async fn completed_pipeline_passes_value_through() {
        let (_dir, _cache, guard) = guard();
        let outcome = guard
            .run(async { Ok(7) }, std::future::pending())
            .await
            .unwrap();
        assert_eq!(outcome, GuardOutcome::Completed(7));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn interruption_flushes_in_memory_entries() {
        let (_dir, cache, guard) = guard();
        cache.insert("DIDRegistry", Address::new([4; 20]));

        let outcome = guard
            .run(std::future::pending::<Result<()>>(), async {})
            .await
            .unwrap();
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.exit_code(), 1);

        let saved = AddressCache::load(cache.path()).unwrap();
        assert_eq!(saved.get("DIDRegistry"), Some(Address::new([4; 20])));
    }

    #[tokio::test]
    async fn fatal_error_flushes_then_propagates() {
        let (_dir, cache, guard) = guard();
        cache.insert("EpochLibrary", Address::new([5; 20]));

        let err = guard
            .run(
                async { Err::<(), _>(OrchestratorError::MissingCoreArtifact("DIDRegistry".into())) },
                std::future::pending(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MissingCoreArtifact");
        assert!(AddressCache::load(cache.path()).unwrap().contains("EpochLibrary"));
    }
}
