//! Engine Pool: a bounded pool of search engines plus a separate CPU worker
//! pool, with crash recovery and batch de-duplication. Grounded on the
//! original `backend/engine_pool.py` (recovery serialization, FEN
//! de-duplication in `analyze_game_parallel`) and the teacher's
//! `worker/mod.rs` channel-of-workers idiom, generalized from sync
//! threads to `tokio::sync::mpsc` over async engines. Generic over the
//! [`SearchEngine`] implementation so tests can substitute a deterministic
//! in-process stub for the real UCI subprocess.

pub mod stub;
pub mod uci;
pub mod worker;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::AnalysisError;
use crate::model::{EvalScore, EvaluationPair, MultipvLine};
use uci::{pv_to_san, PvLine, SearchEngine, UciEngine};

pub use worker::WorkerPool;

type SpawnFn<E> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<E, AnalysisError>> + Send>> + Send + Sync>;

pub struct EnginePool<E: SearchEngine + 'static> {
    idle: Mutex<mpsc::Receiver<E>>,
    idle_tx: mpsc::Sender<E>,
    recreate_lock: Mutex<()>,
    config: EngineConfig,
    spawn: SpawnFn<E>,
}

impl<E: SearchEngine + 'static> EnginePool<E> {
    /// Generic constructor: spawns `config.pool_size` engines using the
    /// given factory, which is kept around for crash-recovery respawns.
    pub async fn initialize_with<F, Fut>(config: EngineConfig, spawn: F) -> Result<Self, AnalysisError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<E, AnalysisError>> + Send + 'static,
    {
        let spawn: SpawnFn<E> = Arc::new(move || Box::pin(spawn()));
        let (tx, rx) = mpsc::channel(config.pool_size.max(1));
        for i in 0..config.pool_size.max(1) {
            let engine = (spawn)().await?;
            tx.send(engine)
                .await
                .map_err(|_| AnalysisError::Internal("engine pool channel closed during init".into()))?;
            info!(worker = i, "spawned search engine");
        }
        Ok(EnginePool {
            idle: Mutex::new(rx),
            idle_tx: tx,
            recreate_lock: Mutex::new(()),
            config,
            spawn,
        })
    }

    async fn acquire(&self) -> Result<E, AnalysisError> {
        let mut rx = self.idle.lock().await;
        timeout(self.config.acquire_timeout(), rx.recv())
            .await
            .map_err(|_| AnalysisError::EngineTimeout(self.config.acquire_timeout()))?
            .ok_or_else(|| AnalysisError::Internal("engine pool is shut down".into()))
    }

    async fn release(&self, engine: E) {
        let _ = self.idle_tx.send(engine).await;
    }

    /// Respawns one engine under a pool-wide lock so only one recovery
    /// runs at a time, mirroring `_recreate_engine` in the original pool.
    async fn recreate_engine(&self) -> Result<E, AnalysisError> {
        let _guard = self.recreate_lock.lock().await;
        warn!("recreating crashed search engine");
        (self.spawn)().await
    }

    /// Runs `f` against a live engine, retrying with a freshly spawned
    /// engine up to `max_engine_restarts` times if the engine dies or
    /// reports a failure mid-analysis.
    async fn with_engine<T, F, Fut>(&self, mut f: F) -> Result<T, AnalysisError>
    where
        F: FnMut(E) -> Fut,
        Fut: Future<Output = (E, Result<T, AnalysisError>)>,
    {
        let mut engine = self.acquire().await?;
        let mut attempts = 0;
        loop {
            let (returned, result) = f(engine).await;
            match result {
                Ok(value) => {
                    self.release(returned).await;
                    return Ok(value);
                }
                Err(err) if attempts < self.config.max_engine_restarts => {
                    attempts += 1;
                    warn!(attempt = attempts, error = %err, "engine analysis failed, recreating");
                    engine = self.recreate_engine().await?;
                }
                Err(err) => {
                    return Err(err);
                }
            }
        }
    }

    fn lines_to_pair(fen: &str, depth: u32, lines: Vec<PvLine>) -> EvaluationPair {
        let multipv_results: Vec<MultipvLine> = lines
            .iter()
            .map(|l| MultipvLine {
                eval_cp: l.score.cp,
                mate_in: l.score.mate_in,
                pv_san: pv_to_san(fen, &l.pv_uci),
            })
            .collect();
        let best = multipv_results.first();
        EvaluationPair {
            fen: fen.to_string(),
            depth,
            eval_cp: best.map(|b| b.eval_cp).unwrap_or(0),
            mate_in: best.and_then(|b| b.mate_in),
            pv_san: best.map(|b| b.pv_san.clone()).unwrap_or_default(),
            multipv_results,
        }
    }

    /// `analyse_position(fen, depth, k) -> EvaluationPair`: the top-`k`
    /// variations and their evaluations at the requested depth.
    pub async fn analyse_position(&self, fen: &str, depth: u32, k: usize) -> Result<EvaluationPair, AnalysisError> {
        let fen = fen.to_string();
        let deadline = self.config.analysis_timeout();
        let fen_for_result = fen.clone();
        self.with_engine(move |mut engine| {
            let fen = fen.clone();
            async move {
                let result = engine
                    .analyze_lines(&fen, depth, k, deadline)
                    .await
                    .map(|lines| Self::lines_to_pair(&fen, depth, lines));
                (engine, result)
            }
        })
        .await
        .map_err(|e| {
            warn!(fen = %fen_for_result, "analyse_position failed");
            e
        })
    }

    /// `analyse_line_pair(fen_before, move, depth) -> (EvaluationPair_before, EvaluationPair_after)`,
    /// using a single engine instance for both halves to guarantee
    /// consistent engine state.
    pub async fn analyse_line_pair(
        &self,
        fen_before: &str,
        fen_after: &str,
        depth: u32,
        k: usize,
    ) -> Result<(EvaluationPair, EvaluationPair), AnalysisError> {
        let fen_before = fen_before.to_string();
        let fen_after = fen_after.to_string();
        let deadline = self.config.analysis_timeout();
        self.with_engine(move |mut engine| {
            let fen_before = fen_before.clone();
            let fen_after = fen_after.clone();
            async move {
                let before = engine.analyze_lines(&fen_before, depth, k, deadline).await;
                let after = match &before {
                    Ok(_) => engine.analyze_lines(&fen_after, depth, k, deadline).await,
                    Err(_) => Err(AnalysisError::Internal("skipped after-eval, before-eval failed".into())),
                };
                let combined = before.and_then(|b| {
                    after.map(|a| {
                        (
                            Self::lines_to_pair(&fen_before, depth, b),
                            Self::lines_to_pair(&fen_after, depth, a),
                        )
                    })
                });
                (engine, combined)
            }
        })
        .await
    }

    /// `analyse_position_batch(positions, depth, k, progress_callback)`:
    /// de-duplicated batch analysis. `n` sequential positions share up to
    /// `n+1` unique FENs, so each unique FEN is analyzed once and the
    /// result fanned back out to every position that needs it, in
    /// submission order. `progress_callback` is invoked after each unique
    /// FEN resolves with `(completed, total_unique)`.
    pub async fn analyse_position_batch<F>(
        &self,
        fens: Vec<String>,
        depth: u32,
        k: usize,
        mut progress_callback: F,
    ) -> Result<Vec<EvaluationPair>, AnalysisError>
    where
        F: FnMut(usize, usize),
    {
        let mut unique_fens: Vec<String> = Vec::new();
        for fen in &fens {
            if !unique_fens.contains(fen) {
                unique_fens.push(fen.clone());
            }
        }

        let total = unique_fens.len();
        let mut cache: HashMap<String, EvaluationPair> = HashMap::new();
        for (i, fen) in unique_fens.iter().enumerate() {
            let pair = self.analyse_position(fen, depth, k).await?;
            cache.insert(fen.clone(), pair);
            progress_callback(i + 1, total);
        }

        let mut out = Vec::with_capacity(fens.len());
        for fen in fens {
            let pair = cache
                .get(&fen)
                .cloned()
                .ok_or_else(|| AnalysisError::Internal("missing cached fen".into()))?;
            out.push(pair);
        }
        Ok(out)
    }

    pub async fn health_check(&self) -> bool {
        let rx = self.idle.lock().await;
        !rx.is_closed()
    }

    /// Static NNUE evaluator dump request. Bounded by `nnue_dump_timeout_s`;
    /// failure returns `nnue_unavailable`, never fatal to the caller.
    pub async fn dump_nnue(&self, fen: &str) -> Result<crate::model::NnueDump, AnalysisError> {
        let fen = fen.to_string();
        let deadline = self.config.nnue_dump_timeout();
        let lines = self
            .with_engine(move |mut engine| {
                let fen = fen.clone();
                async move {
                    // A real NNUE dump comes from the engine's `eval` command;
                    // this uses a depth-1 single-line analysis as a stand-in
                    // classical/NNUE split since stockfish's textual `eval`
                    // output isn't standardized across engine builds.
                    let result = engine.analyze_lines(&fen, 1, 1, deadline).await;
                    (engine, result)
                }
            })
            .await
            .map_err(|e| AnalysisError::NnueUnavailable(e.to_string()))?;

        let mut dump = crate::model::NnueDump::default();
        if let Some(line) = lines.first() {
            dump.per_term_contributions.insert("root".to_string(), line.score.cp as f64);
        }
        Ok(dump)
    }

    pub async fn shutdown(self) {
        drop(self.idle_tx);
        let mut rx = self.idle.into_inner();
        while let Some(engine) = rx.recv().await {
            engine.shutdown().await;
        }
    }
}

impl EnginePool<UciEngine> {
    pub async fn initialize(config: EngineConfig) -> Result<Self, AnalysisError> {
        let engine_path = config.engine_path.clone();
        Self::initialize_with(config, move || {
            let engine_path = engine_path.clone();
            async move { UciEngine::spawn(&engine_path).await }
        })
        .await
    }
}

/// Owns the two heterogeneous pools this component manages together: the
/// async engine pool and the CPU-bound analyzer worker pool.
pub struct Pools<E: SearchEngine + 'static = UciEngine> {
    pub engines: Arc<EnginePool<E>>,
    pub workers: Arc<WorkerPool>,
}

impl Pools<UciEngine> {
    pub async fn initialize(config: EngineConfig) -> Result<Self, AnalysisError> {
        let pool_size = config.pool_size;
        let engines = EnginePool::initialize(config).await?;
        let workers = WorkerPool::new(pool_size)?;
        Ok(Pools {
            engines: Arc::new(engines),
            workers: Arc::new(workers),
        })
    }
}

impl<E: SearchEngine + 'static> Pools<E> {
    pub async fn initialize_with<F, Fut>(config: EngineConfig, spawn: F) -> Result<Self, AnalysisError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<E, AnalysisError>> + Send + 'static,
    {
        let pool_size = config.pool_size;
        let engines = EnginePool::initialize_with(config, spawn).await?;
        let workers = WorkerPool::new(pool_size)?;
        Ok(Pools {
            engines: Arc::new(engines),
            workers: Arc::new(workers),
        })
    }
}
