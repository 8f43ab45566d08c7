//! Data model shared by every component: positions, tags, themes, pieces,
//! exploration trees and the final investigation result.

use serde::{Deserialize, Serialize};
use shakmaty::{CastlingMode, Chess, Color, Role, Square};
use std::collections::BTreeMap;

use crate::error::AnalysisError;

/// A FEN-backed position. Holds the parsed [`shakmaty::Chess`] alongside the
/// normalized FEN it was built from, so callers never have to re-derive one
/// from the other.
#[derive(Debug, Clone)]
pub struct Position {
    pub fen: String,
    pub chess: Chess,
}

impl Position {
    pub fn from_fen(fen: &str) -> Result<Self, AnalysisError> {
        let setup: shakmaty::fen::Fen = fen
            .parse()
            .map_err(|e| AnalysisError::InvalidPosition(format!("{fen}: {e}")))?;
        let chess: Chess = setup
            .into_position(CastlingMode::Standard)
            .map_err(|e| AnalysisError::InvalidPosition(format!("{fen}: {e}")))?;
        Ok(Position {
            fen: fen.to_string(),
            chess,
        })
    }

    pub fn side_to_move(&self) -> Color {
        use shakmaty::Position as _;
        self.chess.turn()
    }
}

/// Evaluation score, either a centipawn value or a forced mate. Kept as two
/// separate fields rather than a single sentinel-encoded integer so callers
/// never have to guess whether `10000` means "ten pawns" or "mate found".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalScore {
    pub cp: i32,
    pub mate_in: Option<i32>,
}

impl EvalScore {
    pub fn cp(cp: i32) -> Self {
        EvalScore { cp, mate_in: None }
    }

    pub fn mate(mate_in: i32) -> Self {
        let sign = if mate_in >= 0 { 1 } else { -1 };
        let cp = sign * (10_000 - mate_in.abs());
        EvalScore {
            cp,
            mate_in: Some(mate_in),
        }
    }

    pub fn is_mate(&self) -> bool {
        self.mate_in.is_some()
    }
}

/// Tactical vs positional bucket. Tags whose family is not in the closed
/// vocabulary fall back to `Positional` (see DESIGN.md open question #1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagCategory {
    Tactical,
    Positional,
}

/// Structured detail attached to a tag, enough for downstream components
/// (piece attribution, motif mining) to consume without re-parsing a name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagDetails {
    pub attacker: Option<Square>,
    pub target: Option<Square>,
    pub pinner: Option<Square>,
    pub pinned: Option<Square>,
    pub extra_squares: Vec<Square>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub category: TagCategory,
    pub side: Color,
    pub squares: Vec<Square>,
    pub details: TagDetails,
}

/// Per-side theme score, rounded to 2dp, as required by the Position
/// Analyzer contract.
pub type ThemeScores = BTreeMap<String, [f64; 2]>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedPosition {
    pub fen: String,
    pub material_cp: i32,
    pub positional_cp: i32,
    pub themes: ThemeScores,
    pub tags: Vec<Tag>,
}

/// Stable identity of a single physical piece as it is tracked across a line
/// of moves. Two pieces of the same colour that started on different
/// squares are different identities even after captures reshuffle the
/// board. The identity token itself never changes, even across a
/// promotion — only the piece's *current* type does (tracked separately,
/// see [`IdentityState`]), so `role` is deliberately not part of this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PieceIdentity {
    pub color: Color,
    pub start_square: Square,
}

impl PieceIdentity {
    /// Stable string id for this identity, e.g. `white_pawn_e2`. Takes the
    /// piece's *current* type explicitly since that can change across a
    /// promotion while the identity token itself stays fixed.
    pub fn piece_id(&self, piece_type: Role) -> String {
        format!(
            "{}_{}_{}",
            color_letter(self.color),
            role_name(piece_type),
            self.start_square
        )
    }
}

pub fn color_letter(c: Color) -> &'static str {
    match c {
        Color::White => "white",
        Color::Black => "black",
    }
}

pub fn role_name(r: Role) -> &'static str {
    match r {
        Role::Pawn => "pawn",
        Role::Knight => "knight",
        Role::Bishop => "bishop",
        Role::Rook => "rook",
        Role::Queen => "queen",
        Role::King => "king",
    }
}

/// Current square and current piece type of one tracked identity, at one
/// ply of a line. `square: None` means captured. `piece_type` starts equal
/// to the identity's original type and changes only on promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityState {
    pub square: Option<Square>,
    pub piece_type: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PieceRole {
    Undeveloped,
    Passive,
    Dominant,
    Attacker,
    Defender,
    Active,
    Restricted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceProfile {
    pub identity: PieceIdentity,
    pub piece_type: Role,
    pub current_square: Option<Square>,
    pub captured: bool,
    pub mobility_cp: f64,
    pub threat_cp: f64,
    pub space_cp: f64,
    pub king_safety_cp: f64,
    pub tags: Vec<String>,
    pub role: PieceRole,
    pub role_confidence: f64,
}

impl PieceProfile {
    pub fn piece_id(&self) -> String {
        self.identity.piece_id(self.piece_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionResult {
    pub nnue_available: bool,
    pub profiles: Vec<PieceProfile>,
}

/// One multipv variation: its own evaluation and principal variation, in
/// SAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipvLine {
    pub eval_cp: i32,
    pub mate_in: Option<i32>,
    pub pv_san: Vec<String>,
}

/// The Engine Pool's atomic result for a single searched position:
/// `(eval_cp, pv_san, depth, multipv_results)` per the external interface
/// contract. `eval_cp`/`mate_in`/`pv_san` mirror the best (first) multipv
/// line for convenience; `multipv_results` holds every requested line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationPair {
    pub fen: String,
    pub depth: u32,
    pub eval_cp: i32,
    pub mate_in: Option<i32>,
    pub pv_san: Vec<String>,
    pub multipv_results: Vec<MultipvLine>,
}

impl EvaluationPair {
    pub fn best(&self) -> EvalScore {
        EvalScore {
            cp: self.eval_cp,
            mate_in: self.mate_in,
        }
    }
}

/// One node of the bounded exploration tree the Dual-Depth Investigator
/// builds. Stored in an arena (`Vec<ExplorationNode>`) addressed by index
/// rather than owned recursively, so traversal and bounding (max depth/
/// nodes/branch lines) stay iterative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationNode {
    pub fen: String,
    pub mv_san: Option<String>,
    pub mv_uci: Option<String>,
    pub eval_d2: EvalScore,
    pub eval_d16: EvalScore,
    pub depth_from_root: u32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub is_overrated: bool,
    /// Set when this node's deep-eval gap to its sibling runner-up is
    /// >= `threat_significance_cp`.
    pub threat_claim_gap_cp: Option<i32>,
    /// Set when the engine failed while expanding this branch; the branch
    /// is truncated here but siblings still complete (spec scenario S6).
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum InvestigationState {
    Unstarted,
    RootScanned,
    TreeBuilt,
    EvidenceComputed,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverratedMove {
    pub node_index: Option<usize>,
    pub mv_san: String,
    pub shallow_rank: usize,
    pub deep_rank: usize,
    pub overrated_by_cp: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatClaimSource {
    pub fen: String,
    pub mv_san: String,
    pub significance_cp: i32,
}

/// One ply of piece-attribution delta along the evidence line: for each
/// tracked identity, how much its NNUE/classical contribution changed
/// across this move, plus the tags/roles gained or lost by the mover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerMoveDelta {
    pub ply: usize,
    pub mv_san: String,
    pub identity_deltas_cp: BTreeMap<String, f64>,
    pub tags_gained: Vec<String>,
    pub tags_lost: Vec<String>,
    pub roles_gained: Vec<String>,
    pub roles_lost: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Claim {
    Baseline {
        fen: String,
        eval_d2_cp: i32,
        eval_d16_cp: i32,
        best_move_d16: Option<String>,
        is_critical: bool,
    },
    EvidenceLine {
        evidence_pgn_line: Vec<String>,
        evidence_starting_fen: String,
        evidence_end_fen: String,
        eval_start_cp: i32,
        eval_end_cp: i32,
        eval_delta_cp: i32,
        material_start_cp: i32,
        material_end_cp: i32,
        positional_start_cp: i32,
        positional_end_cp: i32,
        tags_gained_net: Vec<String>,
        tags_lost_net: Vec<String>,
        roles_gained_net: Vec<String>,
        roles_lost_net: Vec<String>,
        nnue_tag_relevance: Vec<TagRelevance>,
    },
    OverestimatedMove {
        mv_san: String,
        overrated_by_cp: i32,
        shallow_rank: usize,
        deep_rank: usize,
    },
    CriticalPosition {
        fen: String,
        gap_cp: i32,
    },
    Threat {
        source: ThreatClaimSource,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRelevance {
    pub tag_name: String,
    pub relevance_score: f64,
    pub piece_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub state: InvestigationState,
    pub root_fen: String,
    pub eval_d2: EvalScore,
    pub eval_d16: EvalScore,
    pub best_move_d16: Option<String>,
    pub second_best_move_d16: Option<String>,
    pub best_move_d16_eval_cp: Option<i32>,
    pub second_best_move_d16_eval_cp: Option<i32>,
    pub is_critical: bool,
    pub is_winning: bool,
    pub tree: Vec<ExplorationNode>,
    pub overrated_moves: Vec<OverratedMove>,
    pub critical_position: Option<(String, i32)>,

    pub evidence_pgn_line: Vec<String>,
    pub evidence_starting_fen: String,
    pub evidence_end_fen: String,
    pub evidence_eval_start_cp: i32,
    pub evidence_eval_end_cp: i32,
    pub evidence_eval_delta_cp: i32,
    pub evidence_material_start_cp: i32,
    pub evidence_material_end_cp: i32,
    pub evidence_positional_start_cp: i32,
    pub evidence_positional_end_cp: i32,
    pub evidence_per_move_deltas: Vec<PerMoveDelta>,
    pub evidence_tags_gained_net: Vec<String>,
    pub evidence_tags_lost_net: Vec<String>,
    pub evidence_roles_gained_net: Vec<String>,
    pub evidence_roles_lost_net: Vec<String>,

    pub motifs: Vec<Motif>,
    pub claims: Vec<Claim>,
    pub cancelled: bool,
}

/// Parsed output of a static NNUE evaluator dump: per-piece contributions
/// keyed by `piece_id` and per-term classical contributions for the closed
/// term set (mobility/threat/space/king_safety).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NnueDump {
    pub per_piece_contributions: BTreeMap<String, f64>,
    pub per_term_contributions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotifClassification {
    HiddenTacticCandidate,
    StrategicMotif,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotifExample {
    pub line_id: usize,
    pub root_kind: String,
    pub san_window: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Motif {
    pub signature: String,
    pub granularity: u8,
    pub length_plies: usize,
    pub significance: f64,
    pub classification: MotifClassification,
    pub occurrences: usize,
    pub distinct_root_branches: usize,
    pub distinct_lines: usize,
    pub counts_per_root_kind: BTreeMap<String, usize>,
    pub examples: Vec<MotifExample>,
}
