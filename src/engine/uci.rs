//! UCI engine subprocess transport. Speaks the same `position fen ...` /
//! `go depth ...` / `info ... / bestmove ...` protocol the original
//! Python engine pool drove through `chess.engine.popen_uci`, but over
//! `tokio::process` rather than an external library.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Position as _};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::model::EvalScore;

/// Abstraction over "a thing that can be sent `position`/`go depth` and
/// answer with scored principal variations", implemented by [`UciEngine`]
/// for production use and by a deterministic in-process stub in tests, so
/// the Engine Pool's crash-recovery and batching logic can be exercised
/// without spawning a real subprocess.
#[async_trait]
pub trait SearchEngine: Send {
    async fn analyze_lines(
        &mut self,
        fen: &str,
        depth: u32,
        multipv: usize,
        deadline: Duration,
    ) -> Result<Vec<PvLine>, AnalysisError>;

    fn is_alive(&mut self) -> bool;

    async fn shutdown(self);
}

fn parse_score(tokens: &[&str]) -> Option<EvalScore> {
    let idx = tokens.iter().position(|&t| t == "score")?;
    match tokens.get(idx + 1).copied() {
        Some("cp") => {
            let cp: i32 = tokens.get(idx + 2)?.parse().ok()?;
            Some(EvalScore::cp(cp))
        }
        Some("mate") => {
            let m: i32 = tokens.get(idx + 2)?.parse().ok()?;
            Some(EvalScore::mate(m))
        }
        _ => None,
    }
}

fn parse_multipv_index(tokens: &[&str]) -> usize {
    tokens
        .iter()
        .position(|&t| t == "multipv")
        .and_then(|idx| tokens.get(idx + 1))
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1)
}

/// Every move in the `pv ...` field, in order, not just the first one —
/// needed to recover the full principal variation in SAN.
fn parse_pv_moves(tokens: &[&str]) -> Vec<String> {
    let Some(idx) = tokens.iter().position(|&t| t == "pv") else {
        return Vec::new();
    };
    tokens[idx + 1..].iter().map(|s| s.to_string()).collect()
}

/// One multipv line: its score and full principal variation in UCI form
/// (converted to SAN by the Engine Pool, which knows the starting FEN).
#[derive(Debug, Clone)]
pub struct PvLine {
    pub pv_uci: Vec<String>,
    pub score: EvalScore,
}

impl PvLine {
    pub fn first_move_uci(&self) -> Option<&str> {
        self.pv_uci.first().map(|s| s.as_str())
    }
}

/// Converts a UCI principal variation to SAN from a starting FEN, stopping
/// at the first move that fails to parse or apply (an engine occasionally
/// reports a truncated or illegal-looking PV near mate).
pub fn pv_to_san(fen: &str, pv_uci: &[String]) -> Vec<String> {
    let Ok(setup) = fen.parse::<shakmaty::fen::Fen>() else {
        return Vec::new();
    };
    let Ok(mut pos): Result<Chess, _> = setup.into_position(CastlingMode::Standard) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(pv_uci.len());
    for mv_uci in pv_uci {
        let Ok(uci): Result<UciMove, _> = mv_uci.parse() else {
            break;
        };
        let Ok(mv) = uci.to_move(&pos) else {
            break;
        };
        out.push(shakmaty::san::San::from_move(&pos, &mv).to_string());
        pos.play_unchecked(&mv);
    }
    out
}

pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl UciEngine {
    pub async fn spawn(engine_path: &str) -> Result<Self, AnalysisError> {
        let mut child = tokio::process::Command::new(engine_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalysisError::EngineFailed(format!("spawn {engine_path}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnalysisError::EngineFailed("engine has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnalysisError::EngineFailed("engine has no stdout".into()))?;
        let lines = BufReader::new(stdout).lines();

        let mut engine = UciEngine { child, stdin, lines };
        engine.initialize().await?;
        Ok(engine)
    }

    async fn send(&mut self, cmd: &str) -> Result<(), AnalysisError> {
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| AnalysisError::EngineFailed(format!("write {cmd:?}: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| AnalysisError::EngineFailed(format!("flush: {e}")))
    }

    async fn wait_for(&mut self, marker: &str) -> Result<Vec<String>, AnalysisError> {
        let mut collected = Vec::new();
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| AnalysisError::EngineFailed(format!("read: {e}")))?
                .ok_or_else(|| AnalysisError::EngineFailed("engine stdout closed".into()))?;
            let found = line.starts_with(marker);
            collected.push(line);
            if found {
                return Ok(collected);
            }
        }
    }

    async fn initialize(&mut self) -> Result<(), AnalysisError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;
        self.send("setoption name Threads value 1").await?;
        self.send("setoption name Hash value 32").await?;
        self.send("setoption name Ponder value false").await?;
        self.send("isready").await?;
        self.wait_for("readyok").await?;
        debug!("uci engine initialized");
        Ok(())
    }

    async fn analyze_lines_inner(
        &mut self,
        fen: &str,
        depth: u32,
        multipv: usize,
    ) -> Result<Vec<PvLine>, AnalysisError> {
        self.send(&format!("setoption name MultiPV value {multipv}")).await?;
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go depth {depth}")).await?;

        let mut by_pv: std::collections::BTreeMap<usize, PvLine> = std::collections::BTreeMap::new();
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| AnalysisError::EngineFailed(format!("read: {e}")))?
                .ok_or_else(|| AnalysisError::EngineFailed("engine stdout closed".into()))?;

            if line.starts_with("info") {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if let Some(score) = parse_score(&tokens) {
                    let pv = parse_multipv_index(&tokens);
                    by_pv.insert(
                        pv,
                        PvLine {
                            pv_uci: parse_pv_moves(&tokens),
                            score,
                        },
                    );
                }
            } else if line.starts_with("bestmove") {
                break;
            }
        }

        if by_pv.is_empty() {
            warn!(fen, "engine produced no score lines");
            return Err(AnalysisError::EngineFailed("no score reported".into()));
        }
        Ok(by_pv.into_values().collect())
    }
}

#[async_trait]
impl SearchEngine for UciEngine {
    async fn analyze_lines(
        &mut self,
        fen: &str,
        depth: u32,
        multipv: usize,
        deadline: Duration,
    ) -> Result<Vec<PvLine>, AnalysisError> {
        timeout(deadline, self.analyze_lines_inner(fen, depth, multipv))
            .await
            .map_err(|_| AnalysisError::EngineTimeout(deadline))?
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn shutdown(mut self) {
        let _ = self.send("quit").await;
        let _ = self.child.wait().await;
    }
}
