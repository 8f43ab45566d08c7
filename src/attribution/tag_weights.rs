//! Closed tag -> piece relevance weighting table, used both for assigning
//! Position Analyzer tags to pieces and for scoring NNUE tag relevance in
//! the Claim Builder. A static match table rather than a dynamic map, per
//! the "tagged variants, not a dynamic record type" design note.

use shakmaty::Role;

/// Relative weight (0.0-1.0) of a tag family for a given piece role. Falls
/// back to a generic prefix-based weight when no specific entry matches
/// (mirrors `TAG_PIECE_RELEVANCE` in the original piece profiler).
pub fn tag_weight(tag_name: &str, role: Role) -> f64 {
    match (tag_name, role) {
        ("tag.threat.hanging", _) => 1.0,
        ("tag.threat.pin", Role::Bishop | Role::Rook | Role::Queen) => 1.0,
        ("tag.threat.pin", _) => 0.4,
        ("tag.threat.fork", Role::Knight) => 1.0,
        ("tag.threat.fork", _) => 0.3,
        ("tag.threat.capture_higher_value", _) => 0.9,
        ("tag.threat.check", Role::King) => 1.0,
        ("tag.lane.open_file", Role::Rook | Role::Queen) => 1.0,
        ("tag.lane.semi_open_file", Role::Rook | Role::Queen) => 0.8,
        ("tag.lane.seventh_rank", Role::Rook) => 1.0,
        ("tag.lane.outpost", Role::Knight) => 1.0,
        ("tag.structure.passed_pawn", Role::Pawn) => 1.0,
        ("tag.structure.weak_square_control", _) => 0.6,
        ("tag.colour_complex.bad_bishop", Role::Bishop) => 1.0,
        ("tag.king.shield_weak", Role::King) => 1.0,
        _ if tag_name.starts_with("tag.threat") => 0.5,
        _ if tag_name.starts_with("tag.lane") => 0.4,
        _ if tag_name.starts_with("tag.structure") => 0.4,
        _ => 0.2,
    }
}
