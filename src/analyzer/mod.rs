//! Position Analyzer: pure, synchronous, deterministic tag/theme/material
//! scoring. No search, no I/O — every score here is a function of the
//! board alone, adapted from the classical evaluation terms in
//! `game/evaluation/*.rs`.

mod tags;
mod themes;

use shakmaty::{Board, Color, Piece, Position as _, Role};
use std::collections::BTreeMap;

use crate::error::AnalysisError;
use crate::model::{Position, TaggedPosition};

const THEME_NAMES: [&str; 14] = [
    "center_space",
    "pawn_structure",
    "king_safety",
    "piece_activity",
    "colour_complex",
    "lanes",
    "local_imbalances",
    "tactics",
    "development",
    "promotion_assets",
    "structural_breaks",
    "threats",
    "prophylaxis",
    "trades",
];

fn piece_value(role: Role) -> i32 {
    match role {
        Role::Pawn => 100,
        Role::Knight => 320,
        Role::Bishop => 330,
        Role::Rook => 500,
        Role::Queen => 900,
        Role::King => 0,
    }
}

/// Exposed for the in-process stub engine's synthetic move ranking.
pub fn piece_value_pub(role: Role) -> i32 {
    piece_value(role)
}

fn material_cp(board: &Board) -> i32 {
    let mut white = 0;
    let mut black = 0;
    for &color in &Color::ALL {
        for role in Role::ALL {
            let count = board
                .by_piece(Piece { role, color })
                .count() as i32;
            if color == Color::White {
                white += count * piece_value(role);
            } else {
                black += count * piece_value(role);
            }
        }
    }
    white - black
}

fn theme_score(name: &str, board: &Board, color: Color) -> f64 {
    match name {
        "center_space" => themes::center_space(board, color),
        "pawn_structure" => themes::pawn_structure(board, color),
        "king_safety" => themes::king_safety(board, color),
        "piece_activity" => themes::piece_activity(board, color),
        "colour_complex" => themes::colour_complex(board, color),
        "lanes" => themes::lanes(board, color),
        "local_imbalances" => themes::local_imbalances(board, color),
        "tactics" => themes::tactics(board, color),
        "development" => themes::development(board, color),
        "promotion_assets" => themes::promotion_assets(board, color),
        "structural_breaks" => themes::structural_breaks(board, color),
        "threats" => themes::threats(board, color),
        "prophylaxis" => themes::prophylaxis(board, color),
        "trades" => themes::trades(board, color),
        _ => 0.0,
    }
}

/// Scores a position: material, per-theme per-side scores, and the closed
/// tag vocabulary. Deterministic and synchronous per the component
/// contract; callers needing concurrency run this on the CPU worker pool
/// (see `engine::worker`).
pub fn analyse(position: &Position) -> Result<TaggedPosition, AnalysisError> {
    let board = position.chess.board();

    let mut theme_scores = BTreeMap::new();
    let mut positional_white = 0.0;
    let mut positional_black = 0.0;
    for &name in THEME_NAMES.iter() {
        let white = theme_score(name, board, Color::White);
        let black = theme_score(name, board, Color::Black);
        positional_white += white;
        positional_black += black;
        theme_scores.insert(
            name.to_string(),
            [round2(white), round2(black)],
        );
    }

    let positional_cp = (positional_white - positional_black).round() as i32;

    let tags = tags::detect(&position.chess);

    Ok(TaggedPosition {
        fen: position.fen.clone(),
        material_cp: material_cp(board),
        positional_cp,
        themes: theme_scores,
        tags,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TagCategory;

    fn pos(fen: &str) -> Position {
        Position::from_fen(fen).unwrap()
    }

    #[test]
    fn starting_position_has_zero_material_imbalance() {
        let p = pos("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let tagged = analyse(&p).unwrap();
        assert_eq!(tagged.material_cp, 0);
    }

    #[test]
    fn hanging_queen_is_tagged_tactical() {
        // White queen on d5 undefended, attacked by black knight on f6 and nothing defends it.
        let p = pos("rnb1kbnr/pppp1ppp/5n2/3Qp3/4P3/8/PPPP1PPP/RNB1KBNR w KQkq - 2 3");
        let tagged = analyse(&p).unwrap();
        assert!(tagged
            .tags
            .iter()
            .any(|t| t.name == "tag.threat.hanging" && t.category == TagCategory::Tactical));
    }

    #[test]
    fn theme_scores_cover_all_fourteen_themes() {
        let p = pos("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let tagged = analyse(&p).unwrap();
        assert_eq!(tagged.themes.len(), THEME_NAMES.len());
    }

    #[test]
    fn material_is_positive_when_white_is_ahead_white_to_move() {
        let p = pos("rnbqkbn1/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQq - 0 1");
        let tagged = analyse(&p).unwrap();
        assert!(tagged.material_cp > 0);
    }

    #[test]
    fn material_is_still_positive_when_white_is_ahead_black_to_move() {
        // Same material imbalance (black missing a rook), but black on move.
        // material_cp must stay white-relative, not flip with side to move.
        let p = pos("rnbqkbn1/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR b KQq - 0 1");
        let tagged = analyse(&p).unwrap();
        assert!(tagged.material_cp > 0);
    }
}
