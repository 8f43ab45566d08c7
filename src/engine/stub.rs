//! Deterministic in-process stand-in for a real UCI engine, implementing
//! [`SearchEngine`] so integration tests can drive the Engine Pool and the
//! Dual-Depth Investigator without spawning a subprocess. Explicit
//! per-`(fen, depth)` responses take priority; anything not overridden
//! falls back to a deterministic synthetic ranking over legal moves, so
//! generic positions still produce a plausible, reproducible multipv list.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shakmaty::{CastlingMode, Chess, Position as _};

use super::uci::{PvLine, SearchEngine};
use crate::error::AnalysisError;
use crate::model::EvalScore;

#[derive(Debug, Clone, Default)]
pub struct StubResponses {
    pub by_fen_depth: BTreeMap<(String, u32), Vec<PvLine>>,
    pub poisoned_fens: HashSet<String>,
}

impl StubResponses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, fen: &str, depth: u32, lines: Vec<PvLine>) -> Self {
        self.by_fen_depth.insert((fen.to_string(), depth), lines);
        self
    }

    pub fn with_poisoned(mut self, fen: &str) -> Self {
        self.poisoned_fens.insert(fen.to_string());
        self
    }
}

pub struct StubEngine {
    responses: Arc<StubResponses>,
}

impl StubEngine {
    pub fn new(responses: Arc<StubResponses>) -> Self {
        StubEngine { responses }
    }

    pub async fn spawn(responses: Arc<StubResponses>) -> Result<Self, AnalysisError> {
        Ok(StubEngine::new(responses))
    }
}

/// Ranks every legal move by a deterministic synthetic score (material
/// after the move, broken down further by a fixed per-move-index nudge so
/// shallow and deep "searches" disagree exactly the way a real engine's
/// d2 and d16 passes would), then truncates to `multipv`.
fn synthetic_lines(fen: &str, depth: u32, multipv: usize) -> Result<Vec<PvLine>, AnalysisError> {
    let setup: shakmaty::fen::Fen = fen
        .parse()
        .map_err(|e| AnalysisError::InvalidPosition(format!("{fen}: {e}")))?;
    let pos: Chess = setup
        .into_position(CastlingMode::Standard)
        .map_err(|e| AnalysisError::InvalidPosition(format!("{fen}: {e}")))?;

    let mut moves: Vec<_> = pos.legal_moves().iter().cloned().collect();
    if moves.is_empty() {
        return Ok(Vec::new());
    }
    moves.sort_by_key(|m| shakmaty::uci::UciMove::from_standard(m).to_string());

    let mut scored: Vec<(i32, shakmaty::Move)> = moves
        .into_iter()
        .enumerate()
        .map(|(i, mv)| {
            let mut after = pos.clone();
            after.play_unchecked(&mv);
            let gain = mv
                .capture()
                .map(|r| crate::analyzer::piece_value_pub(r))
                .unwrap_or(0);
            // d2 and d16 intentionally disagree: the shallow pass overweights
            // immediate material, the deep pass applies a small
            // depth-dependent correction keyed by move index.
            let depth_bias = if depth <= 4 { 0 } else { ((i as i32 * 37) % 23) - 11 };
            (gain * 10 - i as i32 + depth_bias, mv)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out = Vec::new();
    for (score, mv) in scored.into_iter().take(multipv.max(1)) {
        let uci = shakmaty::uci::UciMove::from_standard(&mv).to_string();
        out.push(PvLine {
            pv_uci: vec![uci],
            score: EvalScore::cp(score),
        });
    }
    Ok(out)
}

#[async_trait]
impl SearchEngine for StubEngine {
    async fn analyze_lines(
        &mut self,
        fen: &str,
        depth: u32,
        multipv: usize,
        _deadline: Duration,
    ) -> Result<Vec<PvLine>, AnalysisError> {
        if self.responses.poisoned_fens.contains(fen) {
            return Err(AnalysisError::EngineFailed(format!("stub engine poisoned for {fen}")));
        }
        if let Some(lines) = self.responses.by_fen_depth.get(&(fen.to_string(), depth)) {
            return Ok(lines.clone());
        }
        synthetic_lines(fen, depth, multipv)
    }

    fn is_alive(&mut self) -> bool {
        true
    }

    async fn shutdown(self) {}
}
