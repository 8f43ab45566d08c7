//! Piece Attribution: per-piece NNUE/classical contribution, role
//! classification, and per-move identity tracking along a line. Grounded
//! on the original `piece_profiler.py::classify_piece_role` precedence
//! order and `claims.py::_track_piece_instances_along_line`'s identity
//! bookkeeping.

pub mod tag_weights;

use shakmaty::san::San;
use shakmaty::{Chess, Color, Move, Piece, Position as _, Role, Square};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    AttributionResult, IdentityState, NnueDump, PerMoveDelta, PieceIdentity, PieceProfile,
    PieceRole, TagRelevance, TaggedPosition,
};

#[derive(Debug, Clone, Copy)]
pub struct RoleThresholds {
    pub passive_mobility: f64,
    pub active_mobility: f64,
    pub dominant_key_squares: usize,
    pub attacker_attacks: usize,
    pub attacker_threat_cp: f64,
    pub defender_defends: usize,
}

impl Default for RoleThresholds {
    fn default() -> Self {
        RoleThresholds {
            passive_mobility: 10.0,
            active_mobility: 40.0,
            dominant_key_squares: 3,
            attacker_attacks: 2,
            attacker_threat_cp: 30.0,
            defender_defends: 2,
        }
    }
}

fn is_opening(board: &shakmaty::Board) -> bool {
    let developed_minors = (board.by_role(Role::Knight) | board.by_role(Role::Bishop)).count();
    developed_minors >= 6
}

fn starting_square(color: Color, role: Role, sq: Square) -> bool {
    let start_rank = if color == Color::White {
        shakmaty::Rank::First
    } else {
        shakmaty::Rank::Eighth
    };
    matches!(role, Role::Knight | Role::Bishop | Role::Queen) && sq.rank() == start_rank
}

fn key_squares() -> shakmaty::Bitboard {
    use shakmaty::Square::*;
    shakmaty::Bitboard::from(D4) | shakmaty::Bitboard::from(E4) | shakmaty::Bitboard::from(D5) | shakmaty::Bitboard::from(E5)
}

/// Classifies a single piece's role by the closed precedence order:
/// undeveloped -> passive -> dominant -> attacker -> defender -> active ->
/// restricted (fallback).
pub fn classify_piece_role(
    profile: &PieceProfile,
    position: &Chess,
    square: Square,
    thresholds: &RoleThresholds,
) -> (PieceRole, f64) {
    let board = position.board();
    let identity = profile.identity;
    let piece_type = profile.piece_type;

    if is_opening(board) && starting_square(identity.color, piece_type, square) {
        return (PieceRole::Undeveloped, 0.9);
    }
    if profile.mobility_cp < thresholds.passive_mobility {
        return (PieceRole::Passive, 0.7);
    }
    let attacks = board.attacks_from(square);
    let key_control = (attacks & key_squares()).count();
    if key_control >= thresholds.dominant_key_squares {
        return (PieceRole::Dominant, 0.8);
    }
    let enemy = attacks & board.by_color(!identity.color);
    if enemy.count() >= thresholds.attacker_attacks || profile.threat_cp >= thresholds.attacker_threat_cp {
        return (PieceRole::Attacker, 0.75);
    }
    let friendly = attacks & board.by_color(identity.color);
    if friendly.count() >= thresholds.defender_defends {
        return (PieceRole::Defender, 0.65);
    }
    if profile.mobility_cp >= thresholds.active_mobility {
        return (PieceRole::Active, 0.7);
    }
    (PieceRole::Restricted, 0.5)
}

/// Assigns Position Analyzer tags to the pieces they are relevant to.
/// Threat tags assign to both attacker and target; lane/structure tags
/// assign to the piece on the named square; everything else falls back to
/// the `tag_weights` prefix table filtered to non-zero relevance.
fn assign_tags(tagged: &TaggedPosition, identities: &[(PieceIdentity, Role, Square)]) -> BTreeMap<Square, Vec<String>> {
    let mut out: BTreeMap<Square, Vec<String>> = BTreeMap::new();
    let by_square: BTreeMap<Square, Role> = identities.iter().map(|(_, role, sq)| (*sq, *role)).collect();

    for t in &tagged.tags {
        if let Some(attacker) = t.details.attacker {
            out.entry(attacker).or_default().push(t.name.clone());
        }
        if let Some(target) = t.details.target {
            out.entry(target).or_default().push(t.name.clone());
        }
        if let Some(pinner) = t.details.pinner {
            out.entry(pinner).or_default().push(t.name.clone());
        }
        if let Some(pinned) = t.details.pinned {
            out.entry(pinned).or_default().push(t.name.clone());
        }
        for &sq in &t.details.extra_squares {
            out.entry(sq).or_default().push(t.name.clone());
        }
        for &sq in &t.squares {
            if t.details.attacker.is_none() && t.details.target.is_none() && t.details.pinner.is_none() {
                out.entry(sq).or_default().push(t.name.clone());
            }
        }
    }

    for (sq, role) in by_square {
        out.entry(sq).or_default().retain(|name| tag_weights::tag_weight(name, role) > 0.0);
    }
    out
}

/// Distributes classical per-term contributions across pieces of a theme
/// proportionally to their mobility share, mirroring
/// `_attribute_classical_to_pieces`'s proportional split when no per-piece
/// NNUE breakdown is available.
fn classical_shares(identities: &[(PieceIdentity, Role, Square)], position: &Chess) -> BTreeMap<Square, f64> {
    let board = position.board();
    let occupied = board.occupied();
    let mut shares = BTreeMap::new();
    let mut total = 0.0;
    for (id, role, sq) in identities {
        let friendly = board.by_color(id.color);
        let mobility = (shakmaty::attacks::attacks(*sq, Piece { role: *role, color: id.color }, occupied) & !friendly).count() as f64;
        shares.insert(*sq, mobility);
        total += mobility;
    }
    if total > 0.0 {
        for v in shares.values_mut() {
            *v /= total;
        }
    }
    shares
}

fn board_identities(board: &shakmaty::Board) -> Vec<(PieceIdentity, Role, Square)> {
    let mut identities = Vec::new();
    for &color in &Color::ALL {
        for role in Role::ALL {
            for sq in board.by_piece(Piece { role, color }) {
                identities.push((
                    PieceIdentity {
                        color,
                        start_square: sq,
                    },
                    role,
                    sq,
                ));
            }
        }
    }
    identities
}

/// Builds per-piece profiles for a single position: tags, classical/NNUE
/// contributions, and role classification.
pub fn attribute(
    position: &Chess,
    tagged: &TaggedPosition,
    nnue: Option<&NnueDump>,
    thresholds: &RoleThresholds,
) -> AttributionResult {
    let board = position.board();
    let identities = board_identities(board);

    let tag_assignments = assign_tags(tagged, &identities);
    let mobility_shares = classical_shares(&identities, position);
    let nnue_available = nnue.is_some();

    let mut profiles = Vec::new();
    for (identity, role, sq) in &identities {
        let share = *mobility_shares.get(sq).unwrap_or(&0.0);
        let mobility_cp = share * tagged.themes.get("piece_activity").map(|v| side_score(v, identity.color)).unwrap_or(0.0);
        let threat_cp = share * tagged.themes.get("threats").map(|v| side_score(v, identity.color)).unwrap_or(0.0);
        let space_cp = share * tagged.themes.get("center_space").map(|v| side_score(v, identity.color)).unwrap_or(0.0);
        let king_safety_cp = share * tagged.themes.get("king_safety").map(|v| side_score(v, identity.color)).unwrap_or(0.0);

        let (mobility_cp, threat_cp, space_cp, king_safety_cp) = if let Some(dump) = nnue {
            let id_str = identity.piece_id(*role);
            let nnue_contrib = dump.per_piece_contributions.get(&id_str).copied();
            match nnue_contrib {
                Some(v) => (v, threat_cp, space_cp, king_safety_cp),
                None => (mobility_cp, threat_cp, space_cp, king_safety_cp),
            }
        } else {
            (mobility_cp, threat_cp, space_cp, king_safety_cp)
        };

        let tags = tag_assignments.get(sq).cloned().unwrap_or_default();

        let mut profile = PieceProfile {
            identity: *identity,
            piece_type: *role,
            current_square: Some(*sq),
            captured: false,
            mobility_cp,
            threat_cp,
            space_cp,
            king_safety_cp,
            tags,
            role: PieceRole::Restricted,
            role_confidence: 0.0,
        };
        let (role_class, confidence) = classify_piece_role(&profile, position, *sq, thresholds);
        profile.role = role_class;
        profile.role_confidence = confidence;
        profiles.push(profile);
    }

    AttributionResult {
        nnue_available,
        profiles,
    }
}

fn side_score(scores: &[f64; 2], color: Color) -> f64 {
    if color == Color::White {
        scores[0]
    } else {
        scores[1]
    }
}

/// One ply of identity tracking: the mapping from every piece identity
/// present at the start of the line to its current square and current
/// piece type, or `square: None` if captured. Updated by explicit
/// assignment per move, never reconstructed from the resulting board —
/// captures and promotions would otherwise make square-indexed
/// reconstruction ambiguous. A promoted pawn keeps the same identity token
/// but its `piece_type` changes to the promoted role from that ply onward.
pub fn track_identities_along_line(
    root: &Chess,
    moves: &[Move],
) -> Vec<BTreeMap<PieceIdentity, IdentityState>> {
    let board = root.board();
    let mut current: BTreeMap<PieceIdentity, IdentityState> = BTreeMap::new();
    for (identity, role, sq) in board_identities(board) {
        current.insert(
            identity,
            IdentityState {
                square: Some(sq),
                piece_type: role,
            },
        );
    }

    let mut frames = vec![current.clone()];
    let mut pos = root.clone();
    for mv in moves {
        let mover_color = pos.turn();
        match mv {
            Move::Castle { king, rook } => {
                // shakmaty represents castling as the king's square and the
                // own rook's square it "captures"; under standard castling
                // rules the king always ends on the c- or g-file and the
                // rook on the d- or f-file of the same rank as the king.
                let kingside = rook.file() > king.file();
                let rank = king.rank();
                let king_to = Square::from_coords(
                    if kingside { shakmaty::File::G } else { shakmaty::File::C },
                    rank,
                );
                let rook_to = Square::from_coords(
                    if kingside { shakmaty::File::F } else { shakmaty::File::D },
                    rank,
                );
                move_identity(&mut current, mover_color, *king, king_to, None);
                move_identity(&mut current, mover_color, *rook, rook_to, None);
            }
            Move::EnPassant { from, to } => {
                let captured_sq = Square::from_coords(to.file(), from.rank());
                if let Some((&captured_identity, _)) = current
                    .iter()
                    .find(|(id, st)| id.color != mover_color && st.square == Some(captured_sq))
                {
                    if let Some(state) = current.get_mut(&captured_identity) {
                        state.square = None;
                    }
                }
                move_identity(&mut current, mover_color, *from, *to, None);
            }
            Move::Normal { from, to, capture, promotion, .. } => {
                if capture.is_some() {
                    if let Some((&captured_identity, _)) = current
                        .iter()
                        .find(|(id, st)| id.color != mover_color && st.square == Some(*to))
                    {
                        if let Some(state) = current.get_mut(&captured_identity) {
                            state.square = None;
                        }
                    }
                }
                move_identity(&mut current, mover_color, *from, *to, *promotion);
            }
            Move::Put { .. } => {}
        }
        pos.play_unchecked(*mv);
        frames.push(current.clone());
    }
    frames
}

fn move_identity(
    current: &mut BTreeMap<PieceIdentity, IdentityState>,
    mover_color: Color,
    from: Square,
    to: Square,
    promotion: Option<Role>,
) {
    if let Some((&identity, state)) = current
        .iter()
        .find(|(id, st)| id.color == mover_color && st.square == Some(from))
    {
        let new_type = promotion.unwrap_or(state.piece_type);
        if let Some(state) = current.get_mut(&identity) {
            state.square = Some(to);
            state.piece_type = new_type;
        }
    }
}

/// Per-move deltas and net tag/role aggregation along a SAN line, per
/// spec.md's "Per-move deltas along a line": reparses the line move by
/// move, samples attribution contributions before/after each ply, and
/// sums per-identity deltas plus tag/role net gain/loss across the whole
/// line.
pub fn attribute_line(
    start: &Chess,
    moves_san: &[String],
    thresholds: &RoleThresholds,
) -> Result<
    (
        Vec<PerMoveDelta>,
        Vec<String>,
        Vec<String>,
        Vec<String>,
        Vec<String>,
    ),
    crate::error::AnalysisError,
> {
    use crate::error::AnalysisError;

    let mut pos = start.clone();
    let mut per_move = Vec::with_capacity(moves_san.len());
    let mut tags_start: BTreeSet<String> = BTreeSet::new();
    let mut tags_end: BTreeSet<String> = BTreeSet::new();
    let mut roles_start: BTreeSet<(String, String)> = BTreeSet::new();
    let mut roles_end: BTreeSet<(String, String)> = BTreeSet::new();

    let before_tagged = crate::analyzer::analyse(&crate::model::Position {
        fen: shakmaty::fen::Fen::from_setup(pos.clone().into_setup(shakmaty::EnPassantMode::Legal)).to_string(),
        chess: pos.clone(),
    })?;
    let mut before_attr = attribute(&pos, &before_tagged, None, thresholds);
    for p in &before_attr.profiles {
        for t in &p.tags {
            tags_start.insert(t.clone());
        }
        roles_start.insert((p.piece_id(), role_name(p.role)));
    }
    let mut before_contrib: BTreeMap<String, f64> = before_attr
        .profiles
        .iter()
        .map(|p| (p.piece_id(), total_contribution(p)))
        .collect();

    for (ply, san_str) in moves_san.iter().enumerate() {
        let san: San = san_str
            .parse()
            .map_err(|e| AnalysisError::Internal(format!("bad san {san_str}: {e}")))?;
        let mv = san
            .to_move(&pos)
            .map_err(|e| AnalysisError::Internal(format!("illegal san {san_str}: {e}")))?;
        pos.play_unchecked(mv);

        let fen_after = shakmaty::fen::Fen::from_setup(pos.clone().into_setup(shakmaty::EnPassantMode::Legal)).to_string();
        let after_tagged = crate::analyzer::analyse(&crate::model::Position {
            fen: fen_after,
            chess: pos.clone(),
        })?;
        let after_attr = attribute(&pos, &after_tagged, None, thresholds);
        let after_contrib: BTreeMap<String, f64> = after_attr
            .profiles
            .iter()
            .map(|p| (p.piece_id(), total_contribution(p)))
            .collect();

        let mut identity_deltas_cp = BTreeMap::new();
        for (id, after_v) in &after_contrib {
            let before_v = before_contrib.get(id).copied().unwrap_or(0.0);
            identity_deltas_cp.insert(id.clone(), after_v - before_v);
        }
        for (id, before_v) in &before_contrib {
            if !after_contrib.contains_key(id) {
                identity_deltas_cp.insert(id.clone(), 0.0 - before_v);
            }
        }

        let before_tags: BTreeSet<String> = before_attr.profiles.iter().flat_map(|p| p.tags.clone()).collect();
        let after_tags: BTreeSet<String> = after_attr.profiles.iter().flat_map(|p| p.tags.clone()).collect();
        let gained: Vec<String> = after_tags.difference(&before_tags).cloned().collect();
        let lost: Vec<String> = before_tags.difference(&after_tags).cloned().collect();

        let before_roles: BTreeSet<(String, String)> =
            before_attr.profiles.iter().map(|p| (p.piece_id(), role_name(p.role))).collect();
        let after_roles: BTreeSet<(String, String)> =
            after_attr.profiles.iter().map(|p| (p.piece_id(), role_name(p.role))).collect();
        let roles_gained: Vec<String> = after_roles
            .difference(&before_roles)
            .map(|(id, r)| format!("{id}:{r}"))
            .collect();
        let roles_lost: Vec<String> = before_roles
            .difference(&after_roles)
            .map(|(id, r)| format!("{id}:{r}"))
            .collect();

        per_move.push(PerMoveDelta {
            ply,
            mv_san: san_str.clone(),
            identity_deltas_cp,
            tags_gained: gained,
            tags_lost: lost,
            roles_gained,
            roles_lost,
        });

        tags_end = after_tags;
        roles_end = after_roles;
        before_attr = after_attr;
        before_contrib = after_contrib;
    }
    if moves_san.is_empty() {
        tags_end = tags_start.clone();
        roles_end = roles_start.clone();
    }

    let tags_gained_net: Vec<String> = tags_end.difference(&tags_start).cloned().collect();
    let tags_lost_net: Vec<String> = tags_start.difference(&tags_end).cloned().collect();
    let roles_gained_net: Vec<String> = roles_end
        .difference(&roles_start)
        .map(|(id, r)| format!("{id}:{r}"))
        .collect();
    let roles_lost_net: Vec<String> = roles_start
        .difference(&roles_end)
        .map(|(id, r)| format!("{id}:{r}"))
        .collect();

    Ok((
        per_move,
        tags_gained_net,
        tags_lost_net,
        roles_gained_net,
        roles_lost_net,
    ))
}

/// NNUE tag relevance enrichment for the evidence line (spec §4.5): for
/// each tag gained or lost over the line, finds the piece identities whose
/// contribution moved along with it and weighs that movement by
/// `tag_weight`, ranking tags by accumulated relevance.
pub fn nnue_tag_relevance(
    per_move_deltas: &[PerMoveDelta],
    tags_gained_net: &[String],
    tags_lost_net: &[String],
) -> Vec<TagRelevance> {
    let mut totals: BTreeMap<String, (f64, BTreeMap<String, f64>)> = BTreeMap::new();

    for tag_name in tags_gained_net.iter().chain(tags_lost_net.iter()) {
        for delta in per_move_deltas {
            for (piece_id, dcp) in &delta.identity_deltas_cp {
                let Some(role) = role_from_piece_id(piece_id) else { continue };
                let w = tag_weights::tag_weight(tag_name, role);
                if w == 0.0 {
                    continue;
                }
                let contribution = dcp.abs() * w.abs();
                let entry = totals.entry(tag_name.clone()).or_insert_with(|| (0.0, BTreeMap::new()));
                entry.0 += contribution;
                *entry.1.entry(piece_id.clone()).or_insert(0.0) += contribution;
            }
        }
    }

    let mut out: Vec<TagRelevance> = totals
        .into_iter()
        .map(|(tag_name, (relevance_score, per_piece))| {
            let mut piece_contribs: Vec<(String, f64)> = per_piece.into_iter().collect();
            piece_contribs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            piece_contribs.truncate(8);
            TagRelevance {
                tag_name,
                relevance_score,
                piece_ids: piece_contribs.into_iter().map(|(id, _)| id).collect(),
            }
        })
        .collect();

    out.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(12);
    out
}

fn role_from_piece_id(piece_id: &str) -> Option<Role> {
    let role_str = piece_id.split('_').nth(1)?;
    match role_str {
        "pawn" => Some(Role::Pawn),
        "knight" => Some(Role::Knight),
        "bishop" => Some(Role::Bishop),
        "rook" => Some(Role::Rook),
        "queen" => Some(Role::Queen),
        "king" => Some(Role::King),
        _ => None,
    }
}

fn total_contribution(p: &crate::model::PieceProfile) -> f64 {
    p.mobility_cp + p.threat_cp + p.space_cp + p.king_safety_cp
}

fn role_name(r: PieceRole) -> String {
    match r {
        PieceRole::Undeveloped => "undeveloped",
        PieceRole::Passive => "passive",
        PieceRole::Dominant => "dominant",
        PieceRole::Attacker => "attacker",
        PieceRole::Defender => "defender",
        PieceRole::Active => "active",
        PieceRole::Restricted => "restricted",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::model::Position as ModelPosition;
    use shakmaty::Position as _;

    #[test]
    fn every_piece_on_board_gets_a_profile() {
        let pos = ModelPosition::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        let tagged = analyzer::analyse(&pos).unwrap();
        let result = attribute(&pos.chess, &tagged, None, &RoleThresholds::default());
        assert_eq!(result.profiles.len(), 32);
        assert!(!result.nnue_available);
    }

    #[test]
    fn knights_on_starting_squares_are_undeveloped_in_the_opening() {
        let pos = ModelPosition::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        let tagged = analyzer::analyse(&pos).unwrap();
        let result = attribute(&pos.chess, &tagged, None, &RoleThresholds::default());
        let b1_knight = result
            .profiles
            .iter()
            .find(|p| p.piece_type == Role::Knight && p.identity.color == Color::White && p.current_square == Some(Square::B1))
            .unwrap();
        assert_eq!(b1_knight.role, PieceRole::Undeveloped);
    }

    #[test]
    fn identity_tracking_follows_piece_through_a_capture() {
        let root = ModelPosition::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")
            .unwrap()
            .chess;
        let legal = root.legal_moves();
        let e4 = legal
            .iter()
            .find(|m| m.to() == Square::E4 && m.from() == Some(Square::E2))
            .unwrap()
            .clone();
        let frames = track_identities_along_line(&root, &[e4]);
        assert_eq!(frames.len(), 2);
        let e2_pawn = PieceIdentity {
            color: Color::White,
            start_square: Square::E2,
        };
        assert_eq!(
            frames[1].get(&e2_pawn),
            Some(&IdentityState {
                square: Some(Square::E4),
                piece_type: Role::Pawn,
            })
        );
    }

    #[test]
    fn promoted_pawn_keeps_identity_but_changes_type() {
        // White pawn on a7 promotes to queen on a8.
        let root = ModelPosition::from_fen("8/P6k/8/8/8/8/7p/7K w - - 0 1").unwrap().chess;
        let legal = root.legal_moves();
        let promotion = legal
            .iter()
            .find(|m| m.from() == Some(Square::A7) && m.to() == Square::A8 && m.promotion() == Some(Role::Queen))
            .unwrap()
            .clone();
        let frames = track_identities_along_line(&root, &[promotion]);
        let a7_pawn = PieceIdentity {
            color: Color::White,
            start_square: Square::A7,
        };
        assert_eq!(
            frames[1].get(&a7_pawn),
            Some(&IdentityState {
                square: Some(Square::A8),
                piece_type: Role::Queen,
            })
        );
    }
}
