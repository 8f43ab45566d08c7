//! CPU worker pool for Position Analyzer work, kept distinct from the
//! (I/O-bound) UCI engine pool per the "two heterogeneous pools... do not
//! fuse them" design note. Generalizes the teacher's `worker::WorkerPool`
//! (a channel of threads each wrapping work in `catch_unwind`) from a
//! single job type tied to global state into an instance-owned pool that
//! runs arbitrary analysis closures.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::error::AnalysisError;
use crate::model::{Position, TaggedPosition};

pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, AnalysisError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size.max(1))
            .build()
            .map_err(|e| AnalysisError::Internal(format!("failed to build cpu worker pool: {e}")))?;
        Ok(WorkerPool { pool: Arc::new(pool) })
    }

    /// Runs the Position Analyzer over a batch of positions in parallel,
    /// isolating panics per-item the way the teacher's worker threads
    /// isolate a searcher panic without taking the whole pool down.
    pub async fn analyse_batch(&self, positions: Vec<Position>) -> Vec<Result<TaggedPosition, AnalysisError>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.install(|| {
                use rayon::prelude::*;
                positions
                    .into_par_iter()
                    .map(|p| {
                        match panic::catch_unwind(AssertUnwindSafe(|| crate::analyzer::analyse(&p))) {
                            Ok(result) => result,
                            Err(_) => {
                                warn!(fen = %p.fen, "position analyzer panicked");
                                Err(AnalysisError::Internal("analyzer panicked".into()))
                            }
                        }
                    })
                    .collect()
            })
        })
        .await
        .unwrap_or_else(|e| vec![Err(AnalysisError::Internal(format!("worker pool join error: {e}")))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analyses_every_position_in_the_batch() {
        let pool = WorkerPool::new(2).unwrap();
        let positions = vec![
            Position::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap(),
            Position::from_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1").unwrap(),
        ];
        let results = pool.analyse_batch(positions).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
