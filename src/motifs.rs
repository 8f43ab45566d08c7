//! Motif & Claim Builder: deterministic motif mining over per-ply token
//! signatures, and the structured claims list built from an investigation.
//! Grounded on the original `motifs.py` (token rows, three granularities,
//! phase-weighted significance, tie-break sort) and `claims.py::build_claims`
//! (claim ordering and per-kind caps).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Policy;
use crate::model::{
    Claim, InvestigationResult, Motif, MotifClassification, MotifExample, TagRelevance,
    ThreatClaimSource,
};

/// One ply's worth of information a motif window is built from.
#[derive(Debug, Clone)]
pub struct PlyContext {
    pub mv_san: String,
    pub piece: String,
    pub move_types: Vec<String>,
    pub tags_gained: Vec<String>,
    pub tags_lost: Vec<String>,
    pub roles_gained: Vec<String>,
    pub roles_lost: Vec<String>,
    pub is_opening_phase: bool,
}

/// One traversed line of the exploration tree: its id, whether it follows
/// the root's deep PV or an overestimated-move branch, and its plies.
#[derive(Debug, Clone)]
pub struct MotifLine {
    pub line_id: usize,
    pub root_kind: String,
    pub plies: Vec<PlyContext>,
}

fn fine_tokens(ctx: &PlyContext) -> Vec<String> {
    let mut tokens = vec![format!("SAN:{}", ctx.mv_san), format!("PIECE:{}", ctx.piece)];
    for t in &ctx.move_types {
        tokens.push(format!("TYPE:{t}"));
    }
    for t in &ctx.tags_gained {
        tokens.push(format!("TAG+:{t}"));
    }
    for t in &ctx.tags_lost {
        tokens.push(format!("TAG-:{t}"));
    }
    for r in &ctx.roles_gained {
        tokens.push(format!("ROLE+:{r}"));
    }
    for r in &ctx.roles_lost {
        tokens.push(format!("ROLE-:{r}"));
    }
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Buckets a `TAG+:`/`TAG-:` token to its first three dotted name
/// components with a `.*` suffix, e.g. `TAG+:tag.threat.fork.knight` ->
/// `TAG+:tag.threat.fork.*`.
fn bucket_tag_token(token: &str) -> String {
    let Some((prefix, rest)) = token.split_once(':') else {
        return token.to_string();
    };
    let parts: Vec<&str> = rest.split('.').collect();
    if parts.len() <= 3 {
        token.to_string()
    } else {
        format!("{prefix}:{}.*", parts[..3].join("."))
    }
}

/// Token rows at the three granularities: coarse (SAN + TYPE) -> mid (+
/// PIECE, + tag tokens bucketed) -> fine (all tokens, unbucketed).
fn tokens_at_granularity(ctx: &PlyContext, granularity: u8) -> Vec<String> {
    let fine = fine_tokens(ctx);
    let mut out: Vec<String> = match granularity {
        1 => fine
            .into_iter()
            .filter(|t| t.starts_with("SAN:") || t.starts_with("TYPE:"))
            .collect(),
        2 => fine
            .into_iter()
            .filter(|t| {
                t.starts_with("SAN:")
                    || t.starts_with("TYPE:")
                    || t.starts_with("PIECE:")
                    || t.starts_with("TAG+:")
                    || t.starts_with("TAG-:")
            })
            .map(|t| if t.starts_with("TAG") { bucket_tag_token(&t) } else { t })
            .collect(),
        _ => fine,
    };
    out.sort();
    out.dedup();
    out
}

fn granularity_name(g: u8) -> &'static str {
    match g {
        1 => "coarse",
        2 => "mid",
        _ => "fine",
    }
}

fn granularity_weight(granularity: u8, opening: bool) -> f64 {
    match (granularity, opening) {
        (1, true) => 1.35,
        (2, true) => 1.2,
        (3, true) => 1.0,
        (1, false) => 1.0,
        (2, false) => 1.15,
        (_, false) => 1.3,
    }
}

fn window_signature(window: &[PlyContext], granularity: u8) -> String {
    let body = window
        .iter()
        .map(|p| tokens_at_granularity(p, granularity).join(","))
        .collect::<Vec<_>>()
        .join(" / ");
    format!("G={} | {body}", granularity_name(granularity))
}

struct MotifAgg {
    occurrences: usize,
    length_plies: usize,
    weight: f64,
    root_branches: BTreeSet<usize>,
    lines: BTreeSet<usize>,
    counts_per_root_kind: BTreeMap<String, usize>,
    examples: Vec<MotifExample>,
}

/// Mines motifs across every traversed line at every enabled granularity
/// and window length up to `max_pattern_plies`, with a deterministic
/// tie-break sort so repeated runs over the same tree always return the
/// same order.
pub fn mine_motifs(lines: &[MotifLine], policy: &Policy) -> Vec<Motif> {
    let mut by_signature: BTreeMap<(u8, String), MotifAgg> = BTreeMap::new();

    let granularities: Vec<u8> = [(1u8, policy.enable_coarse), (2, policy.enable_mid), (3, policy.enable_fine)]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(g, _)| g)
        .collect();

    for line in lines {
        if line.plies.is_empty() {
            continue;
        }
        for &granularity in &granularities {
            let max_len = policy.max_pattern_plies.min(line.plies.len());
            for len in 1..=max_len {
                for window in line.plies.windows(len) {
                    let opening = window[0].is_opening_phase;
                    let signature = window_signature(window, granularity);
                    let san_window: Vec<String> = window.iter().map(|p| p.mv_san.clone()).collect();

                    let entry = by_signature.entry((granularity, signature)).or_insert_with(|| MotifAgg {
                        occurrences: 0,
                        length_plies: len,
                        weight: granularity_weight(granularity, opening),
                        root_branches: BTreeSet::new(),
                        lines: BTreeSet::new(),
                        counts_per_root_kind: BTreeMap::new(),
                        examples: Vec::new(),
                    });
                    entry.occurrences += 1;
                    entry.root_branches.insert(line.line_id);
                    entry.lines.insert(line.line_id);
                    *entry.counts_per_root_kind.entry(line.root_kind.clone()).or_insert(0) += 1;
                    if entry.examples.len() < 5 {
                        entry.examples.push(MotifExample {
                            line_id: line.line_id,
                            root_kind: line.root_kind.clone(),
                            san_window: san_window.clone(),
                        });
                    }
                }
            }
        }
    }

    let mut motifs: Vec<Motif> = by_signature
        .into_iter()
        .map(|((granularity, signature), agg)| {
            let significance = agg.occurrences as f64 * agg.weight * (1.0 + agg.lines.len() as f64 / 10.0);
            let total_roots = agg.root_branches.len().max(1);
            let concentration_limit = (total_roots / 3).max(2);
            let under_overrated = agg.counts_per_root_kind.get("overestimated_root").copied().unwrap_or(0);
            let mostly_overrated = under_overrated * 2 >= agg.occurrences;
            let classification = if mostly_overrated && agg.root_branches.len() <= concentration_limit {
                MotifClassification::HiddenTacticCandidate
            } else {
                MotifClassification::StrategicMotif
            };
            Motif {
                signature,
                granularity,
                length_plies: agg.length_plies,
                significance,
                classification,
                occurrences: agg.occurrences,
                distinct_root_branches: agg.root_branches.len(),
                distinct_lines: agg.lines.len(),
                counts_per_root_kind: agg.counts_per_root_kind,
                examples: agg.examples,
            }
        })
        .collect();

    motifs.sort_by(|a, b| {
        b.significance
            .partial_cmp(&a.significance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.length_plies.cmp(&a.length_plies))
            .then(a.signature.cmp(&b.signature))
    });
    motifs.truncate(policy.motifs_top);
    motifs
}

/// Assembles the structured claims list from a completed investigation, in
/// the fixed order §4.5 describes: baseline, evidence line, overestimated
/// moves (capped), critical position (if any), then threats recorded
/// during tree construction.
pub fn build_claims(result: &InvestigationResult, policy: &Policy, tag_relevance: Vec<TagRelevance>) -> Vec<Claim> {
    let mut claims = Vec::new();

    claims.push(Claim::Baseline {
        fen: result.root_fen.clone(),
        eval_d2_cp: result.eval_d2.cp,
        eval_d16_cp: result.eval_d16.cp,
        best_move_d16: result.best_move_d16.clone(),
        is_critical: result.is_critical,
    });

    claims.push(Claim::EvidenceLine {
        evidence_pgn_line: result.evidence_pgn_line.clone(),
        evidence_starting_fen: result.evidence_starting_fen.clone(),
        evidence_end_fen: result.evidence_end_fen.clone(),
        eval_start_cp: result.evidence_eval_start_cp,
        eval_end_cp: result.evidence_eval_end_cp,
        eval_delta_cp: result.evidence_eval_delta_cp,
        material_start_cp: result.evidence_material_start_cp,
        material_end_cp: result.evidence_material_end_cp,
        positional_start_cp: result.evidence_positional_start_cp,
        positional_end_cp: result.evidence_positional_end_cp,
        tags_gained_net: result.evidence_tags_gained_net.clone(),
        tags_lost_net: result.evidence_tags_lost_net.clone(),
        roles_gained_net: result.evidence_roles_gained_net.clone(),
        roles_lost_net: result.evidence_roles_lost_net.clone(),
        nnue_tag_relevance: tag_relevance,
    });

    for overrated in result.overrated_moves.iter().take(policy.overrated_claim_limit) {
        claims.push(Claim::OverestimatedMove {
            mv_san: overrated.mv_san.clone(),
            overrated_by_cp: overrated.overrated_by_cp,
            shallow_rank: overrated.shallow_rank,
            deep_rank: overrated.deep_rank,
        });
    }

    if result.is_critical {
        claims.push(Claim::CriticalPosition {
            fen: result.root_fen.clone(),
            gap_cp: (result.best_move_d16_eval_cp.unwrap_or(0) - result.second_best_move_d16_eval_cp.unwrap_or(0)).abs(),
        });
    }

    let mut threats_emitted = 0usize;
    for node in &result.tree {
        if threats_emitted >= 8 {
            break;
        }
        let Some(gap) = node.threat_claim_gap_cp else { continue };
        if gap < policy.threat_significance_cp {
            continue;
        }
        let mv_san = node
            .mv_san
            .clone()
            .or_else(|| result.best_move_d16.clone())
            .unwrap_or_default();
        claims.push(Claim::Threat {
            source: ThreatClaimSource {
                fen: node.fen.clone(),
                mv_san,
                significance_cp: gap,
            },
        });
        threats_emitted += 1;
    }

    claims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EvalScore, ExplorationNode, InvestigationState};

    fn ctx(mv: &str, piece: &str, move_types: &[&str], tags: &[&str]) -> PlyContext {
        PlyContext {
            mv_san: mv.into(),
            piece: piece.into(),
            move_types: move_types.iter().map(|s| s.to_string()).collect(),
            tags_gained: tags.iter().map(|s| s.to_string()).collect(),
            tags_lost: vec![],
            roles_gained: vec![],
            roles_lost: vec![],
            is_opening_phase: true,
        }
    }

    #[test]
    fn coarse_tokens_are_a_subset_of_fine_tokens() {
        let p = ctx("Nf3", "knight", &["quiet"], &["tag.threat.fork"]);
        let coarse = tokens_at_granularity(&p, 1);
        let fine = tokens_at_granularity(&p, 3);
        assert!(coarse.iter().all(|t| fine.contains(t)));
        assert!(fine.len() > coarse.len());
    }

    #[test]
    fn mid_tokens_bucket_deep_tag_names() {
        let p = ctx("Bxe5", "bishop", &["capture"], &["tag.threat.pin.absolute.deep"]);
        let mid = tokens_at_granularity(&p, 2);
        assert!(mid.iter().any(|t| t == "TAG+:tag.threat.pin.*"));
    }

    #[test]
    fn repeated_window_increases_occurrences_and_survives_truncation() {
        let policy = Policy::default();
        let plies = vec![
            ctx("Nf3", "knight", &["quiet"], &[]),
            ctx("Nf3", "knight", &["quiet"], &[]),
            ctx("Nf3", "knight", &["quiet"], &[]),
        ];
        let lines = vec![MotifLine {
            line_id: 0,
            root_kind: "pv_root".into(),
            plies,
        }];
        let motifs = mine_motifs(&lines, &policy);
        assert!(!motifs.is_empty());
        assert!(motifs[0].occurrences >= 1);
        assert!(motifs.iter().any(|m| m.signature.starts_with("G=coarse |")));
    }

    #[test]
    fn build_claims_starts_with_baseline_and_orders_overrated_before_critical() {
        let mut result = InvestigationResult {
            state: InvestigationState::Done,
            root_fen: "startpos".into(),
            eval_d2: EvalScore::cp(20),
            eval_d16: EvalScore::cp(30),
            best_move_d16: Some("e4".into()),
            second_best_move_d16: Some("d4".into()),
            best_move_d16_eval_cp: Some(30),
            second_best_move_d16_eval_cp: Some(-120),
            is_critical: true,
            is_winning: false,
            tree: vec![ExplorationNode {
                fen: "startpos".into(),
                mv_san: None,
                mv_uci: None,
                eval_d2: EvalScore::cp(20),
                eval_d16: EvalScore::cp(30),
                depth_from_root: 0,
                parent: None,
                children: vec![],
                is_overrated: false,
                threat_claim_gap_cp: None,
                error: None,
            }],
            overrated_moves: vec![],
            critical_position: None,
            evidence_pgn_line: vec![],
            evidence_starting_fen: "startpos".into(),
            evidence_end_fen: "startpos".into(),
            evidence_eval_start_cp: 30,
            evidence_eval_end_cp: 30,
            evidence_eval_delta_cp: 0,
            evidence_material_start_cp: 0,
            evidence_material_end_cp: 0,
            evidence_positional_start_cp: 0,
            evidence_positional_end_cp: 0,
            evidence_per_move_deltas: vec![],
            evidence_tags_gained_net: vec![],
            evidence_tags_lost_net: vec![],
            evidence_roles_gained_net: vec![],
            evidence_roles_lost_net: vec![],
            motifs: vec![],
            claims: vec![],
            cancelled: false,
        };
        result.overrated_moves.push(crate::model::OverratedMove {
            node_index: None,
            mv_san: "Nc3".into(),
            shallow_rank: 0,
            deep_rank: 1,
            overrated_by_cp: 40,
        });
        let claims = build_claims(&result, &Policy::default(), vec![]);
        assert!(matches!(claims[0], Claim::Baseline { .. }));
        assert!(matches!(claims[1], Claim::EvidenceLine { .. }));
        let overrated_pos = claims.iter().position(|c| matches!(c, Claim::OverestimatedMove { .. })).unwrap();
        let critical_pos = claims.iter().position(|c| matches!(c, Claim::CriticalPosition { .. })).unwrap();
        assert!(overrated_pos < critical_pos);
    }
}
