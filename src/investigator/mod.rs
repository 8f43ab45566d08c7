//! Dual-Depth Investigator: root scan at D2/D16, overrated-move detection,
//! a bounded exploration tree, and a truncated evidence line. Grounded
//! directly in the component's own algorithmic description since no
//! original Python source for this step was available; the arena/index
//! tree shape follows the teacher's style of addressing shared state by a
//! stable key (`MctsCache`) rather than owned recursive nodes.

use std::collections::{BTreeMap, VecDeque};

use shakmaty::san::San;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position as _};
use tracing::{info, warn};

use crate::analyzer;
use crate::attribution::{self, RoleThresholds};
use crate::config::Policy;
use crate::engine::uci::{SearchEngine, UciEngine};
use crate::engine::Pools;
use crate::error::AnalysisError;
use crate::model::{
    EvalScore, EvaluationPair, ExplorationNode, InvestigationResult, InvestigationState, MultipvLine, OverratedMove,
    Position,
};
use crate::motifs::{self, MotifLine, PlyContext};

pub struct Investigator<'a, E: SearchEngine + 'static = UciEngine> {
    pools: &'a Pools<E>,
    policy: &'a Policy,
}

struct Expansion {
    node_index: usize,
    fen: String,
    depth: u32,
}

impl<'a, E: SearchEngine + 'static> Investigator<'a, E> {
    pub fn new(pools: &'a Pools<E>, policy: &'a Policy) -> Self {
        Investigator { pools, policy }
    }

    pub async fn investigate(&self, root_fen: &str) -> Result<InvestigationResult, AnalysisError> {
        let mut result = empty_result(root_fen);

        let root_d2 = self.pools.engines.analyse_position(root_fen, self.policy.d2_depth, self.policy.branching_limit);
        let root_d16 = self.pools.engines.analyse_position(root_fen, self.policy.d16_depth, self.policy.branching_limit);
        let (root_d2, root_d16) = match tokio::join!(root_d2, root_d16) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                result.state = InvestigationState::Failed;
                return Err(e);
            }
        };
        result.state = InvestigationState::RootScanned;

        result.eval_d2 = root_d2.best();
        result.eval_d16 = root_d16.best();
        result.best_move_d16 = first_move(&root_d16, 0);
        result.second_best_move_d16 = first_move(&root_d16, 1);
        result.best_move_d16_eval_cp = root_d16.multipv_results.first().map(|m| m.eval_cp);
        result.second_best_move_d16_eval_cp = root_d16.multipv_results.get(1).map(|m| m.eval_cp);
        result.is_critical = match (result.best_move_d16_eval_cp, result.second_best_move_d16_eval_cp) {
            (Some(a), Some(b)) => (a - b).abs() >= self.policy.critical_gap_cp,
            _ => false,
        };
        result.is_winning = result.eval_d16.cp >= 300;

        let root_threat_gap = root_gap(&root_d16);
        result.tree.push(ExplorationNode {
            fen: root_fen.to_string(),
            mv_san: None,
            mv_uci: None,
            eval_d2: result.eval_d2,
            eval_d16: result.eval_d16,
            depth_from_root: 0,
            parent: None,
            children: Vec::new(),
            is_overrated: false,
            threat_claim_gap_cp: root_threat_gap.filter(|&g| g >= self.policy.threat_significance_cp),
            error: None,
        });

        result.overrated_moves = find_overrated_moves(&root_d2.multipv_results, &root_d16.multipv_results, result.best_move_d16.as_deref());
        result.overrated_moves.truncate(self.policy.branching_limit);

        self.build_tree(root_fen, &root_d2, &root_d16, &mut result).await;
        for overrated in &mut result.overrated_moves {
            overrated.node_index = result.tree[0]
                .children
                .iter()
                .find(|&&idx| result.tree[idx].mv_san.as_deref() == Some(overrated.mv_san.as_str()))
                .copied();
        }
        result.state = InvestigationState::TreeBuilt;

        self.compute_evidence(root_fen, &root_d16, &mut result).await?;
        result.state = InvestigationState::EvidenceComputed;

        let tag_relevance = attribution::nnue_tag_relevance(
            &result.evidence_per_move_deltas,
            &result.evidence_tags_gained_net,
            &result.evidence_tags_lost_net,
        );
        let lines = self.collect_motif_lines(&result);
        result.motifs = motifs::mine_motifs(&lines, self.policy);
        result.claims = motifs::build_claims(&result, self.policy, tag_relevance);

        result.state = InvestigationState::Done;
        info!(
            nodes = result.tree.len(),
            overrated = result.overrated_moves.len(),
            "investigation complete"
        );
        Ok(result)
    }

    async fn build_tree(&self, root_fen: &str, root_d2: &EvaluationPair, root_d16: &EvaluationPair, result: &mut InvestigationResult) {
        let mut queue: VecDeque<Expansion> = VecDeque::new();
        let mut total_lines = 0usize;

        let root_moves = expansion_moves(&result.overrated_moves, result.best_move_d16.as_deref());
        let ordered = stable_child_order(root_moves, &root_d2.multipv_results, &root_d16.multipv_results);

        for (san, eval_d2, eval_d16) in ordered {
            if result.tree.len() >= self.policy.max_tree_nodes || total_lines >= self.policy.max_branch_lines {
                break;
            }
            let Some(child_fen) = apply_san(root_fen, &san) else { continue };
            let is_overrated = result.overrated_moves.iter().any(|m| m.mv_san == san);
            let idx = result.tree.len();
            result.tree.push(ExplorationNode {
                fen: child_fen.clone(),
                mv_san: Some(san),
                mv_uci: None,
                eval_d2,
                eval_d16,
                depth_from_root: 1,
                parent: Some(0),
                children: Vec::new(),
                is_overrated,
                threat_claim_gap_cp: None,
                error: None,
            });
            result.tree[0].children.push(idx);
            total_lines += 1;
            queue.push_back(Expansion { node_index: idx, fen: child_fen, depth: 1 });
        }

        while let Some(expansion) = queue.pop_front() {
            if expansion.depth >= self.policy.max_tree_depth || result.tree.len() >= self.policy.max_tree_nodes {
                continue;
            }
            if total_lines >= self.policy.max_total_lines {
                break;
            }

            let d2_call = self.pools.engines.analyse_position(&expansion.fen, self.policy.d2_depth, self.policy.branching_limit);
            let d16_call = self.pools.engines.analyse_position(&expansion.fen, self.policy.d16_depth, self.policy.branching_limit);
            let (d2, d16) = match tokio::join!(d2_call, d16_call) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(fen = %expansion.fen, error = %e, "branch expansion failed");
                    result.tree[expansion.node_index].error = Some(e.to_string());
                    continue;
                }
            };

            if let Some(gap) = root_gap(&d16) {
                if gap >= self.policy.threat_significance_cp {
                    result.tree[expansion.node_index].threat_claim_gap_cp = Some(gap);
                }
            }

            let best_local = first_move(&d16, 0);
            let local_overrated = find_overrated_moves(&d2.multipv_results, &d16.multipv_results, best_local.as_deref());
            let child_moves = expansion_moves(&local_overrated, best_local.as_deref());
            let ordered = stable_child_order(child_moves, &d2.multipv_results, &d16.multipv_results);

            for (san, eval_d2, eval_d16) in ordered {
                if result.tree.len() >= self.policy.max_tree_nodes || total_lines >= self.policy.max_total_lines {
                    break;
                }
                let Some(child_fen) = apply_san(&expansion.fen, &san) else { continue };
                let is_overrated = local_overrated.iter().any(|m| m.mv_san == san);
                let idx = result.tree.len();
                result.tree.push(ExplorationNode {
                    fen: child_fen.clone(),
                    mv_san: Some(san),
                    mv_uci: None,
                    eval_d2,
                    eval_d16,
                    depth_from_root: expansion.depth + 1,
                    parent: Some(expansion.node_index),
                    children: Vec::new(),
                    is_overrated,
                    threat_claim_gap_cp: None,
                    error: None,
                });
                result.tree[expansion.node_index].children.push(idx);
                total_lines += 1;
                queue.push_back(Expansion { node_index: idx, fen: child_fen, depth: expansion.depth + 1 });
            }
        }
    }

    async fn compute_evidence(&self, root_fen: &str, root_d16: &EvaluationPair, result: &mut InvestigationResult) -> Result<(), AnalysisError> {
        let full_pv = root_d16.multipv_results.first().map(|m| m.pv_san.clone()).unwrap_or_default();
        let pv: Vec<String> = full_pv.into_iter().take(self.policy.max_pv_plies).collect();

        let start_position = Position::from_fen(root_fen)?;
        let mut end_chess = start_position.chess.clone();
        let mut applied = Vec::with_capacity(pv.len());
        for san_str in &pv {
            let Ok(san) = san_str.parse::<San>() else { break };
            let Ok(mv) = san.to_move(&end_chess) else { break };
            end_chess.play_unchecked(mv);
            applied.push(san_str.clone());
        }
        let end_fen = shakmaty::fen::Fen::from_setup(end_chess.clone().into_setup(EnPassantMode::Legal)).to_string();

        result.evidence_pgn_line = applied.clone();
        result.evidence_starting_fen = root_fen.to_string();
        result.evidence_end_fen = end_fen.clone();

        let start_tagged = analyzer::analyse(&start_position)?;
        let end_position = Position { fen: end_fen.clone(), chess: end_chess };
        let end_tagged = analyzer::analyse(&end_position)?;
        result.evidence_material_start_cp = start_tagged.material_cp;
        result.evidence_material_end_cp = end_tagged.material_cp;
        result.evidence_positional_start_cp = start_tagged.positional_cp;
        result.evidence_positional_end_cp = end_tagged.positional_cp;

        if end_fen == root_fen {
            result.evidence_eval_start_cp = result.eval_d16.cp;
            result.evidence_eval_end_cp = result.eval_d16.cp;
        } else {
            let (before, after) = self
                .pools
                .engines
                .analyse_line_pair(root_fen, &end_fen, self.policy.d16_depth, 1)
                .await?;
            result.evidence_eval_start_cp = before.eval_cp;
            result.evidence_eval_end_cp = after.eval_cp;
        }
        result.evidence_eval_delta_cp = result.evidence_eval_end_cp - result.evidence_eval_start_cp;

        let thresholds = RoleThresholds::default();
        let (per_move_deltas, tags_gained_net, tags_lost_net, roles_gained_net, roles_lost_net) =
            attribution::attribute_line(&start_position.chess, &applied, &thresholds)?;
        result.evidence_per_move_deltas = per_move_deltas;
        result.evidence_tags_gained_net = tags_gained_net;
        result.evidence_tags_lost_net = tags_lost_net;
        result.evidence_roles_gained_net = roles_gained_net;
        result.evidence_roles_lost_net = roles_lost_net;

        Ok(())
    }

    /// Builds one motif line from the evidence PV (rich, tag-bearing) plus
    /// one shallow line per root branch (SAN/piece/move-type only, no
    /// per-ply tag data — computing full attribution for every expanded
    /// branch is out of scope for motif mining).
    fn collect_motif_lines(&self, result: &InvestigationResult) -> Vec<MotifLine> {
        let mut lines = Vec::new();

        if !result.evidence_pgn_line.is_empty() {
            if let Ok(start) = Position::from_fen(&result.evidence_starting_fen) {
                let mut plies = Vec::with_capacity(result.evidence_pgn_line.len());
                let mut pos = start.chess;
                for (delta, san_str) in result.evidence_per_move_deltas.iter().zip(result.evidence_pgn_line.iter()) {
                    let Ok(san) = san_str.parse::<San>() else { break };
                    let Ok(mv) = san.to_move(&pos) else { break };
                    let opening = pos.board().occupied().count() > 24;
                    plies.push(PlyContext {
                        mv_san: san_str.clone(),
                        piece: crate::model::role_name(move_piece_role(&mv)).to_string(),
                        move_types: classify_move_types(&mv, san_str),
                        tags_gained: delta.tags_gained.clone(),
                        tags_lost: delta.tags_lost.clone(),
                        roles_gained: delta.roles_gained.clone(),
                        roles_lost: delta.roles_lost.clone(),
                        is_opening_phase: opening,
                    });
                    pos.play_unchecked(mv);
                }
                lines.push(MotifLine { line_id: 0, root_kind: "pv_root".to_string(), plies });
            }
        }

        for &child_idx in &result.tree[0].children {
            let child = &result.tree[child_idx];
            let Some(san_str) = &child.mv_san else { continue };
            if Some(san_str.as_str()) == result.best_move_d16.as_deref() {
                continue;
            }
            let Ok(setup) = result.root_fen.parse::<shakmaty::fen::Fen>() else { continue };
            let Ok(pos): Result<Chess, _> = setup.into_position(CastlingMode::Standard) else { continue };
            let Ok(san) = san_str.parse::<San>() else { continue };
            let Ok(mv) = san.to_move(&pos) else { continue };
            let opening = pos.board().occupied().count() > 24;
            let plies = vec![PlyContext {
                mv_san: san_str.clone(),
                piece: crate::model::role_name(move_piece_role(&mv)).to_string(),
                move_types: classify_move_types(&mv, san_str),
                tags_gained: vec![],
                tags_lost: vec![],
                roles_gained: vec![],
                roles_lost: vec![],
                is_opening_phase: opening,
            }];
            lines.push(MotifLine { line_id: child_idx, root_kind: "overestimated_root".to_string(), plies });
        }

        lines
    }
}

fn empty_result(root_fen: &str) -> InvestigationResult {
    InvestigationResult {
        state: InvestigationState::Unstarted,
        root_fen: root_fen.to_string(),
        eval_d2: EvalScore::cp(0),
        eval_d16: EvalScore::cp(0),
        best_move_d16: None,
        second_best_move_d16: None,
        best_move_d16_eval_cp: None,
        second_best_move_d16_eval_cp: None,
        is_critical: false,
        is_winning: false,
        tree: Vec::new(),
        overrated_moves: Vec::new(),
        critical_position: None,
        evidence_pgn_line: Vec::new(),
        evidence_starting_fen: root_fen.to_string(),
        evidence_end_fen: root_fen.to_string(),
        evidence_eval_start_cp: 0,
        evidence_eval_end_cp: 0,
        evidence_eval_delta_cp: 0,
        evidence_material_start_cp: 0,
        evidence_material_end_cp: 0,
        evidence_positional_start_cp: 0,
        evidence_positional_end_cp: 0,
        evidence_per_move_deltas: Vec::new(),
        evidence_tags_gained_net: Vec::new(),
        evidence_tags_lost_net: Vec::new(),
        evidence_roles_gained_net: Vec::new(),
        evidence_roles_lost_net: Vec::new(),
        motifs: Vec::new(),
        claims: Vec::new(),
        cancelled: false,
    }
}

fn first_move(pair: &EvaluationPair, rank: usize) -> Option<String> {
    pair.multipv_results.get(rank).and_then(|m| m.pv_san.first().cloned())
}

fn root_gap(pair: &EvaluationPair) -> Option<i32> {
    let best = pair.multipv_results.first()?;
    let second = pair.multipv_results.get(1)?;
    Some((best.eval_cp - second.eval_cp).abs())
}

/// `{m in shallow_topK : shallow_rank(m) < shallow_rank(best_move_d16)}` —
/// the moves the shallow search prefers over the move the deep search
/// actually settles on.
fn find_overrated_moves(d2_results: &[MultipvLine], d16_results: &[MultipvLine], best_move_d16: Option<&str>) -> Vec<OverratedMove> {
    let mut out = Vec::new();
    let Some(best) = best_move_d16 else { return out };

    let shallow_first: Vec<Option<&str>> = d2_results.iter().map(|l| l.pv_san.first().map(String::as_str)).collect();
    let Some(best_shallow_rank) = shallow_first.iter().position(|m| *m == Some(best)) else {
        return out;
    };
    let deep_first: Vec<Option<&str>> = d16_results.iter().map(|l| l.pv_san.first().map(String::as_str)).collect();

    for rank in 0..best_shallow_rank {
        let Some(mv_san) = shallow_first[rank] else { continue };
        let deep_rank = deep_first.iter().position(|m| *m == Some(mv_san)).unwrap_or(d16_results.len());
        let overrated_by_cp = d2_results[rank].eval_cp - d2_results[best_shallow_rank].eval_cp;
        out.push(OverratedMove {
            node_index: None,
            mv_san: mv_san.to_string(),
            shallow_rank: rank,
            deep_rank,
            overrated_by_cp,
        });
    }
    out
}

fn expansion_moves(overrated: &[OverratedMove], best_move: Option<&str>) -> Vec<String> {
    let mut moves: Vec<String> = overrated.iter().map(|m| m.mv_san.clone()).collect();
    if let Some(best) = best_move {
        if !moves.iter().any(|m| m == best) {
            moves.push(best.to_string());
        }
    }
    moves
}

/// Children are emitted in stable order: sorted by (SAN, deep-eval,
/// shallow-eval).
fn stable_child_order(moves: Vec<String>, d2_results: &[MultipvLine], d16_results: &[MultipvLine]) -> Vec<(String, EvalScore, EvalScore)> {
    let deep_by_san: BTreeMap<&str, &MultipvLine> = d16_results.iter().filter_map(|m| m.pv_san.first().map(|s| (s.as_str(), m))).collect();
    let shallow_by_san: BTreeMap<&str, &MultipvLine> = d2_results.iter().filter_map(|m| m.pv_san.first().map(|s| (s.as_str(), m))).collect();

    let mut rows: Vec<(String, EvalScore, EvalScore)> = moves
        .into_iter()
        .map(|san| {
            let eval_d16 = deep_by_san.get(san.as_str()).map(|m| EvalScore { cp: m.eval_cp, mate_in: m.mate_in }).unwrap_or(EvalScore::cp(0));
            let eval_d2 = shallow_by_san.get(san.as_str()).map(|m| EvalScore { cp: m.eval_cp, mate_in: m.mate_in }).unwrap_or(EvalScore::cp(0));
            (san, eval_d2, eval_d16)
        })
        .collect();

    rows.sort_by(|a, b| a.0.cmp(&b.0).then(b.2.cp.cmp(&a.2.cp)).then(b.1.cp.cmp(&a.1.cp)));
    rows
}

fn apply_san(fen: &str, san_str: &str) -> Option<String> {
    let setup: shakmaty::fen::Fen = fen.parse().ok()?;
    let pos: Chess = setup.into_position(CastlingMode::Standard).ok()?;
    let san: San = san_str.parse().ok()?;
    let mv = san.to_move(&pos).ok()?;
    let mut next = pos;
    next.play_unchecked(&mv);
    Some(shakmaty::fen::Fen::from_setup(next.into_setup(EnPassantMode::Legal)).to_string())
}

fn move_piece_role(mv: &shakmaty::Move) -> shakmaty::Role {
    match mv {
        shakmaty::Move::Normal { role, .. } => *role,
        shakmaty::Move::Castle { .. } => shakmaty::Role::King,
        shakmaty::Move::EnPassant { .. } => shakmaty::Role::Pawn,
        shakmaty::Move::Put { .. } => shakmaty::Role::Pawn,
    }
}

fn classify_move_types(mv: &shakmaty::Move, san_str: &str) -> Vec<String> {
    let mut types = Vec::new();
    match mv {
        shakmaty::Move::Castle { .. } => types.push("castle".to_string()),
        shakmaty::Move::EnPassant { .. } => types.push("capture".to_string()),
        shakmaty::Move::Normal { capture, promotion, .. } => {
            if capture.is_some() {
                types.push("capture".to_string());
            }
            if promotion.is_some() {
                types.push("promotion".to_string());
            }
        }
        shakmaty::Move::Put { .. } => {}
    }
    if san_str.ends_with('+') || san_str.ends_with('#') {
        types.push("check".to_string());
    }
    if types.is_empty() {
        types.push("quiet".to_string());
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MultipvLine;

    fn line(san: &str, cp: i32) -> MultipvLine {
        MultipvLine { eval_cp: cp, mate_in: None, pv_san: vec![san.to_string()] }
    }

    #[test]
    fn moves_ranked_above_the_deep_best_move_are_overrated() {
        // shallow=[X,Y,Z], deep=[Y,Z,W], best_move_d16=Y: X must be flagged
        // overrated (its shallow_rank 0 < shallow_rank(Y)=1); Z is not,
        // despite being reordered, because its shallow_rank (2) is not
        // less than Y's.
        let d2 = vec![line("X", 80), line("Y", 60), line("Z", 40)];
        let d16 = vec![line("Y", 50), line("Z", 30), line("W", -10)];
        let overrated = find_overrated_moves(&d2, &d16, Some("Y"));
        assert_eq!(overrated.len(), 1);
        assert_eq!(overrated[0].mv_san, "X");
        assert_eq!(overrated[0].shallow_rank, 0);
        assert_eq!(overrated[0].deep_rank, d16.len());
    }

    #[test]
    fn best_move_d16_is_never_flagged_overrated() {
        let d2 = vec![line("Y", 60), line("X", 80)];
        let d16 = vec![line("Y", 50)];
        let overrated = find_overrated_moves(&d2, &d16, Some("Y"));
        assert!(overrated.iter().all(|m| m.mv_san != "Y"));
    }

    #[test]
    fn stable_order_sorts_by_san_then_deep_eval_then_shallow_eval() {
        let d2 = vec![line("Nf3", 10), line("e4", 20)];
        let d16 = vec![line("e4", 40), line("Nf3", 30)];
        let ordered = stable_child_order(vec!["e4".to_string(), "Nf3".to_string()], &d2, &d16);
        assert_eq!(ordered[0].0, "Nf3");
        assert_eq!(ordered[1].0, "e4");
    }
}
