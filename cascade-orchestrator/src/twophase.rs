//! Two-phase execution protocol
//!
//! A unit of work declares a transaction phase and a collateral phase. The
//! transaction phase runs entirely against the shared store transaction and
//! defers a [`CollateralEffect`] carrying whatever arguments the effect will
//! need. After the single commit, deferred effects run in declaration order;
//! the first failing effect gets its compensating `revert` before the failure
//! is surfaced to the caller.
//!
//! Ordering guarantee: external side effects never run for work that did not
//! durably commit, and a commit whose side effects failed is never silently
//! left "successful" in the store.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::context::AppContext;
use crate::service::EngineError;

/// Deferred side effect of a committed transaction phase.
#[async_trait]
pub trait CollateralEffect: Send + Sync {
    /// Invoke external systems. Safe to fail partway; partial effects are
    /// acceptable because `revert` compensates.
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError>;

    /// Compensating store mutation, run in its own transaction when
    /// `collateral` fails. Work already handed to external systems is not
    /// undone; only store-side consistency is restored.
    async fn revert(&self, _db: &PgPool) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Coordinator for composed two-phase operations.
///
/// Nested operations share the executor (and thus the outer transaction and
/// its eventual commit or rollback) by taking `&mut TwoPhaseExecutor`.
/// Dropping the executor without committing rolls the transaction back and
/// discards all deferred effects.
pub struct TwoPhaseExecutor {
    tx: Transaction<'static, Postgres>,
    queue: Vec<Box<dyn CollateralEffect>>,
}

impl TwoPhaseExecutor {
    pub async fn begin(pool: &PgPool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx: pool.begin().await?,
            queue: Vec::new(),
        })
    }

    /// The shared store transaction.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Queue an effect to run after commit.
    pub fn defer(&mut self, effect: impl CollateralEffect + 'static) {
        self.queue.push(Box::new(effect));
    }

    /// Commit the store transaction, then run the queued effects in
    /// declaration order.
    pub async fn commit(self, ctx: &AppContext) -> Result<(), EngineError> {
        self.tx.commit().await?;

        for effect in self.queue {
            if let Err(err) = effect.collateral(ctx).await {
                tracing::error!("Collateral effect failed: {:?}", err);
                if let Err(revert_err) = effect.revert(&ctx.db).await {
                    tracing::error!("Revert failed: {:?}", revert_err);
                }
                return Err(err);
            }
        }

        Ok(())
    }
}
