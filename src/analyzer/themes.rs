//! Per-theme positional scoring. Each function scores one theme for one
//! side, from board primitives only — no search, no recursion. Adapted
//! from the classical evaluation terms in `game/evaluation/*.rs` (PSTs
//! aside, which belong to move search, not position scoring), generalized
//! from "contributes to an eval total" into "reports a named score".

use shakmaty::{attacks, Bitboard, Board, Color, File, Piece, Rank, Role, Square};

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

fn all_attacks(board: &Board, color: Color) -> Bitboard {
    let mut attacked = Bitboard::EMPTY;
    for sq in board.by_color(color) {
        attacked |= board.attacks_from(sq);
    }
    attacked
}

fn adjacent_files(file: File) -> Bitboard {
    let idx = file as u32;
    let mut files = Bitboard::EMPTY;
    if idx > 0 {
        files |= Bitboard::from_file(File::new(idx - 1));
    }
    if idx < 7 {
        files |= Bitboard::from_file(File::new(idx + 1));
    }
    files
}

fn in_front_squares(color: Color, rank_idx: u32) -> Bitboard {
    let mut squares = Bitboard::EMPTY;
    match color {
        Color::White => {
            for r in (rank_idx + 1)..8 {
                squares |= Bitboard::from_rank(Rank::new(r));
            }
        }
        Color::Black => {
            for r in 0..rank_idx {
                squares |= Bitboard::from_rank(Rank::new(r));
            }
        }
    }
    squares
}

fn is_passed(pawn_sq: Square, color: Color, their_pawns: Bitboard) -> bool {
    let file_idx = pawn_sq.file() as u32;
    let front_files = Bitboard::from_file(pawn_sq.file()) | adjacent_files(pawn_sq.file());
    let _ = file_idx;
    (their_pawns & front_files & in_front_squares(color, pawn_sq.rank() as u32)).is_empty()
}

/// center & space control
pub fn center_space(board: &Board, color: Color) -> f64 {
    let pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let mut attacked = Bitboard::EMPTY;
    for sq in pawns {
        attacked |= attacks::pawn_attacks(color, sq);
    }
    let opponent_side = match color {
        Color::White => {
            Bitboard::from_rank(Rank::Fifth)
                | Bitboard::from_rank(Rank::Sixth)
                | Bitboard::from_rank(Rank::Seventh)
                | Bitboard::from_rank(Rank::Eighth)
        }
        Color::Black => {
            Bitboard::from_rank(Rank::First)
                | Bitboard::from_rank(Rank::Second)
                | Bitboard::from_rank(Rank::Third)
                | Bitboard::from_rank(Rank::Fourth)
        }
    };
    let center =
        Bitboard::from(Square::D4) | Bitboard::from(Square::E4) | Bitboard::from(Square::D5) | Bitboard::from(Square::E5);
    let space = (attacked & opponent_side).count() as f64 * 2.0;
    let center_control = (attacked & center).count() as f64 * 5.0;
    space + center_control
}

/// pawn structure: doubled/isolated penalties, passed pawn bonus
pub fn pawn_structure(board: &Board, color: Color) -> f64 {
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });

    let mut score = 0.0;
    for file in File::ALL {
        let count = (our_pawns & Bitboard::from_file(file)).count();
        if count > 1 {
            score -= (count - 1) as f64 * 10.0;
        }
    }
    for pawn_sq in our_pawns {
        if (our_pawns & adjacent_files(pawn_sq.file())).is_empty() {
            score -= 20.0;
        }
        if is_passed(pawn_sq, color, their_pawns) {
            score += 50.0;
        }
    }
    score
}

/// structural breaks: isolated/backward pawns and pawn rams, as a distinct
/// negative-leaning theme from general pawn structure.
pub fn structural_breaks(board: &Board, color: Color) -> f64 {
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let mut score = 0.0;
    for pawn_sq in our_pawns {
        let rank_idx = pawn_sq.rank() as u32;
        let behind_rank = if color == Color::White {
            rank_idx.saturating_sub(1)
        } else {
            (rank_idx + 1).min(7)
        };
        let support = adjacent_files(pawn_sq.file()) & Bitboard::from_rank(Rank::new(behind_rank));
        if (our_pawns & support).is_empty() {
            score -= 5.0;
        }
        let blocking_rank = if color == Color::White {
            rank_idx + 1
        } else {
            rank_idx.wrapping_sub(1)
        };
        if blocking_rank < 8 {
            let blocking_sq = Square::from_coords(pawn_sq.file(), Rank::new(blocking_rank));
            if !(their_pawns & Bitboard::from(blocking_sq)).is_empty() {
                score -= 5.0;
            }
        }
    }
    score
}

/// king safety: pawn shield plus open/semi-open file penalties near king.
pub fn king_safety(board: &Board, color: Color) -> f64 {
    let Some(king_sq) = board.king_of(color) else {
        return 0.0;
    };
    let king_file = king_sq.file() as usize;
    let king_rank = king_sq.rank() as usize;
    let mut score = 0.0;

    let shield_rank = if color == Color::White {
        king_rank + 1
    } else {
        king_rank.wrapping_sub(1)
    };
    if shield_rank < 8 {
        let our_pawns = board.by_piece(Piece {
            role: Role::Pawn,
            color,
        });
        let shield_sq = Square::from_coords(king_sq.file(), Rank::new(shield_rank as u32));
        if !(our_pawns & Bitboard::from(shield_sq)).is_empty() {
            score += 30.0;
        }
        for df in [-1i32, 1] {
            let f = king_file as i32 + df;
            if (0..8).contains(&f) {
                let sq = Square::from_coords(File::new(f as u32), Rank::new(shield_rank as u32));
                if !(our_pawns & Bitboard::from(sq)).is_empty() {
                    score += 15.0;
                }
            }
        }
    }

    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    for f in king_file.saturating_sub(1)..=(king_file + 1).min(7) {
        let file_bb = Bitboard::from_file(File::new(f as u32));
        let ours = (our_pawns & file_bb).is_empty();
        let theirs = (their_pawns & file_bb).is_empty();
        if ours && theirs {
            score -= 25.0;
        } else if ours {
            score -= 15.0;
        }
    }
    score
}

/// piece activity: mobility-weighted legal-ish attack count per piece type.
pub fn piece_activity(board: &Board, color: Color) -> f64 {
    let occupied = board.occupied();
    let friendly = board.by_color(color);
    let mut score = 0.0;
    for role in [Role::Knight, Role::Bishop, Role::Rook, Role::Queen] {
        let bonus = match role {
            Role::Knight => 4.0,
            Role::Bishop => 5.0,
            Role::Rook => 2.0,
            Role::Queen => 1.0,
            _ => 0.0,
        };
        for sq in board.by_piece(Piece { role, color }) {
            let attacked = attacks::attacks(sq, Piece { role, color }, occupied) & !friendly;
            score += attacked.count() as f64 * bonus;
        }
    }
    score
}

/// colour complex: bishops boxed in by same-colour central pawns.
pub fn colour_complex(board: &Board, color: Color) -> f64 {
    let bishops = board.by_piece(Piece {
        role: Role::Bishop,
        color,
    });
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let central = Bitboard::from_file(File::C)
        | Bitboard::from_file(File::D)
        | Bitboard::from_file(File::E)
        | Bitboard::from_file(File::F);
    let central_ranks = Bitboard::from_rank(Rank::Third)
        | Bitboard::from_rank(Rank::Fourth)
        | Bitboard::from_rank(Rank::Fifth)
        | Bitboard::from_rank(Rank::Sixth);
    let central_pawns = our_pawns & central & central_ranks;

    let mut score = 0.0;
    if bishops.count() >= 2 {
        score += 20.0;
    }
    for bishop_sq in bishops {
        let light = bishop_sq.is_light();
        let same_colour_pawns = central_pawns.into_iter().filter(|s| s.is_light() == light).count();
        score -= same_colour_pawns as f64 * 10.0;
    }
    score
}

/// lanes: open/semi-open files for rooks, outposts for knights.
pub fn lanes(board: &Board, color: Color) -> f64 {
    let mut score = 0.0;
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });

    for rook_sq in board.by_piece(Piece {
        role: Role::Rook,
        color,
    }) {
        let file_bb = Bitboard::from_file(rook_sq.file());
        let ours = (our_pawns & file_bb).is_empty();
        let theirs = (their_pawns & file_bb).is_empty();
        if ours && theirs {
            score += 20.0;
        } else if ours {
            score += 10.0;
        }
        let seventh = if color == Color::White {
            Rank::Seventh
        } else {
            Rank::Second
        };
        if rook_sq.rank() == seventh {
            score += 25.0;
        }
    }

    for knight_sq in board.by_piece(Piece {
        role: Role::Knight,
        color,
    }) {
        let rank = knight_sq.rank();
        let on_outpost_rank = match color {
            Color::White => rank >= Rank::Fourth && rank <= Rank::Seventh,
            Color::Black => rank >= Rank::Second && rank <= Rank::Fifth,
        };
        if !on_outpost_rank {
            continue;
        }
        let rank_idx = knight_sq.rank() as u32;
        let back_rank = if color == Color::White {
            rank_idx.wrapping_sub(1)
        } else {
            rank_idx + 1
        };
        if back_rank >= 8 {
            continue;
        }
        let support = adjacent_files(knight_sq.file()) & Bitboard::from_rank(Rank::new(back_rank));
        if (our_pawns & support).is_empty() {
            continue;
        }
        if !(their_pawns & adjacent_files(knight_sq.file())).is_empty() {
            continue;
        }
        score += 30.0;
    }
    score
}

/// local imbalances: control of weak squares in enemy territory.
pub fn local_imbalances(board: &Board, color: Color) -> f64 {
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let our_pieces = board.by_color(color) & !board.pawns();
    let mut score = 0.0;
    for sq in our_pieces {
        if attacks::pawn_attacks(color, sq).intersect(their_pawns).is_empty() {
            let rank_idx = if color == Color::White {
                sq.rank() as u32
            } else {
                7 - sq.rank() as u32
            };
            if rank_idx >= 4 {
                score += 8.0 * (1 + rank_idx as i32 - 4) as f64;
            }
        }
    }
    score
}

/// tactics: favourable captures available right now (simplified SEE gate:
/// our attacker value below the defender's and undefended by a cheaper
/// piece).
pub fn tactics(board: &Board, color: Color) -> f64 {
    let their_color = !color;
    let our_attacks = all_attacks(board, color);
    let mut score = 0.0;
    for role in Role::ALL {
        for sq in board.by_piece(Piece {
            role,
            color: their_color,
        }) {
            if (our_attacks & Bitboard::from(sq)).is_empty() {
                continue;
            }
            if let Some(attacker_role) = least_valuable_attacker(board, color, sq) {
                if piece_value(attacker_role) < piece_value(role) {
                    score += (piece_value(role) - piece_value(attacker_role)) as f64 * 0.05;
                }
            }
        }
    }
    score
}

/// threats: pieces hanging or attacked without adequate defence.
pub fn threats(board: &Board, color: Color) -> f64 {
    let their_color = !color;
    let our_attacks = all_attacks(board, color);
    let their_defenses = all_attacks(board, their_color);
    let mut score = 0.0;
    for role in Role::ALL {
        for sq in board.by_piece(Piece {
            role,
            color: their_color,
        }) {
            if (our_attacks & Bitboard::from(sq)).is_empty() {
                continue;
            }
            if (their_defenses & Bitboard::from(sq)).is_empty() {
                score += piece_value(role) as f64 * 0.1;
            }
        }
    }
    score
}

fn least_valuable_attacker(board: &Board, color: Color, square: Square) -> Option<Role> {
    let mut best = None;
    let mut min_value = i32::MAX;
    for role in Role::ALL {
        if role == Role::King {
            continue;
        }
        for sq in board.by_piece(Piece { role, color }) {
            if !(board.attacks_from(sq) & Bitboard::from(square)).is_empty() {
                let v = piece_value(role);
                if v < min_value {
                    min_value = v;
                    best = Some(role);
                }
            }
        }
    }
    best
}

/// development: minor pieces off the back rank, queen still home.
pub fn development(board: &Board, color: Color) -> f64 {
    let (knight_starts, bishop_starts, queen_start) = if color == Color::White {
        (
            Bitboard::from(Square::B1) | Bitboard::from(Square::G1),
            Bitboard::from(Square::C1) | Bitboard::from(Square::F1),
            Square::D1,
        )
    } else {
        (
            Bitboard::from(Square::B8) | Bitboard::from(Square::G8),
            Bitboard::from(Square::C8) | Bitboard::from(Square::F8),
            Square::D8,
        )
    };
    let mut score = 0.0;
    let knights = board.by_piece(Piece {
        role: Role::Knight,
        color,
    });
    score += (knights & !knight_starts).count() as f64 * 10.0;
    let bishops = board.by_piece(Piece {
        role: Role::Bishop,
        color,
    });
    score += (bishops & !bishop_starts).count() as f64 * 10.0;
    let queen = board.by_piece(Piece {
        role: Role::Queen,
        color,
    });
    if !queen.is_empty() && (queen & Bitboard::from(queen_start)).is_empty() {
        score -= 15.0;
    }
    score
}

/// promotion assets: passed pawns scaled by how advanced they are.
pub fn promotion_assets(board: &Board, color: Color) -> f64 {
    const RANK_BONUS: [f64; 8] = [0.0, 5.0, 10.0, 20.0, 35.0, 60.0, 100.0, 0.0];
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let mut score = 0.0;
    for pawn_sq in our_pawns {
        if !is_passed(pawn_sq, color, their_pawns) {
            continue;
        }
        let rank = pawn_sq.rank() as usize;
        score += if color == Color::White {
            RANK_BONUS[rank]
        } else {
            RANK_BONUS[7 - rank]
        };
    }
    score
}

/// prophylaxis: pins we hold against the opponent's pieces.
pub fn prophylaxis(board: &Board, color: Color) -> f64 {
    let Some(their_king_sq) = board.king_of(!color) else {
        return 0.0;
    };
    let our_sliders = board.by_color(color) & (board.rooks() | board.bishops() | board.queens());
    let occupied = board.occupied();
    let mut score = 0.0;
    for slider_sq in our_sliders {
        let Some(slider) = board.piece_at(slider_sq) else {
            continue;
        };
        let ray = match slider.role {
            Role::Bishop => attacks::bishop_attacks(slider_sq, occupied),
            Role::Rook => attacks::rook_attacks(slider_sq, occupied),
            Role::Queen => attacks::queen_attacks(slider_sq, occupied),
            _ => Bitboard::EMPTY,
        };
        if (ray & Bitboard::from(their_king_sq)).is_empty() {
            continue;
        }
        let between = attacks::between(slider_sq, their_king_sq) & occupied;
        if between.count() == 1 {
            if let Some(sq) = between.into_iter().next() {
                if let Some(p) = board.piece_at(sq) {
                    if p.color != color {
                        score += 20.0;
                    }
                }
            }
        }
    }
    score
}

/// trades: net favourable exchanges available on the board, via a small
/// static-exchange walk rather than full search.
pub fn trades(board: &Board, color: Color) -> f64 {
    let mut score = 0.0;
    let their_color = !color;
    let our_attacks = all_attacks(board, color);
    for role in Role::ALL {
        if role == Role::King {
            continue;
        }
        for sq in board.by_piece(Piece {
            role,
            color: their_color,
        }) {
            if (our_attacks & Bitboard::from(sq)).is_empty() {
                continue;
            }
            let gain = see(board, sq, color);
            if gain > 0 {
                score += gain as f64 * 0.1;
            }
        }
    }
    score
}

fn see(board: &Board, target_square: Square, attacker_color: Color) -> i32 {
    let occupied = board.occupied();
    let attackers = board.attacks_to(target_square, attacker_color, occupied) & board.by_color(attacker_color);
    if attackers.is_empty() {
        return 0;
    }
    let Some(captured) = board.piece_at(target_square) else {
        return 0;
    };
    let Some(attacker_sq) = attackers
        .into_iter()
        .min_by_key(|&sq| board.piece_at(sq).map(|p| piece_value(p.role)).unwrap_or(i32::MAX))
    else {
        return 0;
    };
    let Some(attacker) = board.piece_at(attacker_sq) else {
        return 0;
    };

    let mut next_board = board.clone();
    next_board.discard_piece_at(attacker_sq);
    next_board.set_piece_at(target_square, attacker);

    (piece_value(captured.role) - see(&next_board, target_square, !attacker_color)).max(0)
}
