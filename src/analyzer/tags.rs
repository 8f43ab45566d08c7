//! Closed-vocabulary tag detectors. Each detector inspects the board for one
//! family of motif and emits zero or more [`Tag`] values, ordered by
//! `(category, side, first_square)` at the call site. Unmapped tag names
//! fall back to [`TagCategory::Positional`] (see DESIGN.md open question 1).

use shakmaty::{attacks, Bitboard, Board, Chess, Color, File, Piece, Position, Rank, Role, Square};

use crate::model::{Tag, TagCategory, TagDetails};

fn tag(name: &str, category: TagCategory, side: Color, squares: Vec<Square>, details: TagDetails) -> Tag {
    Tag {
        name: name.to_string(),
        category,
        side,
        squares,
        details,
    }
}

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

pub fn detect(position: &Chess) -> Vec<Tag> {
    let board = position.board();
    let mut tags = Vec::new();
    for color in [Color::White, Color::Black] {
        tags.extend(hanging_pieces(board, color));
        tags.extend(good_trades(board, color));
        tags.extend(pins(board, color));
        tags.extend(forks(board, color));
        tags.extend(passed_pawns(board, color));
        tags.extend(outposts(board, color));
        tags.extend(open_files(board, color));
        tags.extend(seventh_rank_rooks(board, color));
        tags.extend(bad_bishops(board, color));
        tags.extend(weak_square_control(board, color));
        tags.extend(king_shield_weak(board, color));
    }
    if position.is_check() {
        let side = position.turn();
        if let Some(king_sq) = board.king_of(side) {
            tags.push(tag(
                "tag.threat.check",
                TagCategory::Tactical,
                side,
                vec![king_sq],
                TagDetails::default(),
            ));
        }
    }
    tags.sort_by(|a, b| {
        (a.category, a.side, a.squares.first().copied())
            .cmp(&(b.category, b.side, b.squares.first().copied()))
            .then_with(|| a.name.cmp(&b.name))
    });
    tags
}

fn all_attacks(board: &Board, color: Color) -> Bitboard {
    let mut attacked = Bitboard::EMPTY;
    for sq in board.by_color(color) {
        attacked |= board.attacks_from(sq);
    }
    attacked
}

fn least_valuable_attacker(board: &Board, color: Color, square: Square) -> Option<(Square, Role)> {
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
                    best = Some((sq, role));
                }
            }
        }
    }
    best
}

fn hanging_pieces(board: &Board, color: Color) -> Vec<Tag> {
    let their_color = !color;
    let our_attacks = all_attacks(board, color);
    let their_defenses = all_attacks(board, their_color);
    let mut out = Vec::new();
    for role in Role::ALL {
        for sq in board.by_piece(Piece {
            role,
            color: their_color,
        }) {
            if (our_attacks & Bitboard::from(sq)).is_empty() {
                continue;
            }
            if (their_defenses & Bitboard::from(sq)).is_empty() {
                let attacker = least_valuable_attacker(board, color, sq);
                out.push(tag(
                    "tag.threat.hanging",
                    TagCategory::Tactical,
                    color,
                    vec![sq],
                    TagDetails {
                        attacker: attacker.map(|(s, _)| s),
                        target: Some(sq),
                        ..Default::default()
                    },
                ));
            }
        }
    }
    out
}

fn good_trades(board: &Board, color: Color) -> Vec<Tag> {
    let their_color = !color;
    let our_attacks = all_attacks(board, color);
    let their_defenses = all_attacks(board, their_color);
    let mut out = Vec::new();
    for role in Role::ALL {
        for sq in board.by_piece(Piece {
            role,
            color: their_color,
        }) {
            if (our_attacks & Bitboard::from(sq)).is_empty() || (their_defenses & Bitboard::from(sq)).is_empty() {
                continue;
            }
            if let Some((attacker_sq, attacker_role)) = least_valuable_attacker(board, color, sq) {
                if piece_value(attacker_role) < piece_value(role) {
                    out.push(tag(
                        "tag.threat.capture_higher_value",
                        TagCategory::Tactical,
                        color,
                        vec![sq],
                        TagDetails {
                            attacker: Some(attacker_sq),
                            target: Some(sq),
                            ..Default::default()
                        },
                    ));
                }
            }
        }
    }
    out
}

fn pins(board: &Board, color: Color) -> Vec<Tag> {
    let Some(their_king_sq) = board.king_of(!color) else {
        return Vec::new();
    };
    let our_sliders = board.by_color(color) & (board.rooks() | board.bishops() | board.queens());
    let occupied = board.occupied();
    let mut out = Vec::new();
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
        if between.count() != 1 {
            continue;
        }
        let Some(pinned_sq) = between.into_iter().next() else {
            continue;
        };
        if let Some(p) = board.piece_at(pinned_sq) {
            if p.color != color {
                out.push(tag(
                    "tag.threat.pin",
                    TagCategory::Tactical,
                    color,
                    vec![pinned_sq],
                    TagDetails {
                        pinner: Some(slider_sq),
                        pinned: Some(pinned_sq),
                        ..Default::default()
                    },
                ));
            }
        }
    }
    out
}

fn forks(board: &Board, color: Color) -> Vec<Tag> {
    let their_color = !color;
    let mut out = Vec::new();
    for sq in board.by_piece(Piece {
        role: Role::Knight,
        color,
    }) {
        let attacked = attacks::knight_attacks(sq) & board.by_color(their_color);
        let valuable: Vec<Square> = attacked
            .into_iter()
            .filter(|&t| board.piece_at(t).map(|p| p.role != Role::Pawn).unwrap_or(false))
            .collect();
        if valuable.len() >= 2 {
            out.push(tag(
                "tag.threat.fork",
                TagCategory::Tactical,
                color,
                vec![sq],
                TagDetails {
                    attacker: Some(sq),
                    extra_squares: valuable,
                    ..Default::default()
                },
            ));
        }
    }
    out
}

fn passed_pawns(board: &Board, color: Color) -> Vec<Tag> {
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let mut out = Vec::new();
    for sq in our_pawns {
        let file_idx = sq.file() as u32;
        let mut front_files = Bitboard::from_file(sq.file());
        if file_idx > 0 {
            front_files |= Bitboard::from_file(File::new(file_idx - 1));
        }
        if file_idx < 7 {
            front_files |= Bitboard::from_file(File::new(file_idx + 1));
        }
        let rank_idx = sq.rank() as u32;
        let mut front_squares = Bitboard::EMPTY;
        match color {
            Color::White => {
                for r in (rank_idx + 1)..8 {
                    front_squares |= Bitboard::from_rank(Rank::new(r));
                }
            }
            Color::Black => {
                for r in 0..rank_idx {
                    front_squares |= Bitboard::from_rank(Rank::new(r));
                }
            }
        }
        if (their_pawns & front_files & front_squares).is_empty() {
            out.push(tag(
                "tag.structure.passed_pawn",
                TagCategory::Positional,
                color,
                vec![sq],
                TagDetails::default(),
            ));
        }
    }
    out
}

fn outposts(board: &Board, color: Color) -> Vec<Tag> {
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let mut out = Vec::new();
    for sq in board.by_piece(Piece {
        role: Role::Knight,
        color,
    }) {
        let rank = sq.rank();
        let on_rank = match color {
            Color::White => rank >= Rank::Fourth && rank <= Rank::Seventh,
            Color::Black => rank >= Rank::Second && rank <= Rank::Fifth,
        };
        if !on_rank {
            continue;
        }
        let file_idx = sq.file() as u32;
        let mut adjacent = Bitboard::EMPTY;
        if file_idx > 0 {
            adjacent |= Bitboard::from_file(File::new(file_idx - 1));
        }
        if file_idx < 7 {
            adjacent |= Bitboard::from_file(File::new(file_idx + 1));
        }
        if !(their_pawns & adjacent).is_empty() {
            continue;
        }
        let rank_idx = sq.rank() as u32;
        let back_rank = if color == Color::White {
            rank_idx.wrapping_sub(1)
        } else {
            rank_idx + 1
        };
        if back_rank >= 8 {
            continue;
        }
        let support = adjacent & Bitboard::from_rank(Rank::new(back_rank));
        if (our_pawns & support).is_empty() {
            continue;
        }
        out.push(tag(
            "tag.lane.outpost",
            TagCategory::Positional,
            color,
            vec![sq],
            TagDetails::default(),
        ));
    }
    out
}

fn open_files(board: &Board, color: Color) -> Vec<Tag> {
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let mut out = Vec::new();
    for sq in board.by_piece(Piece {
        role: Role::Rook,
        color,
    }) {
        let file_bb = Bitboard::from_file(sq.file());
        let ours = (our_pawns & file_bb).is_empty();
        let theirs = (their_pawns & file_bb).is_empty();
        if ours && theirs {
            out.push(tag(
                "tag.lane.open_file",
                TagCategory::Positional,
                color,
                vec![sq],
                TagDetails::default(),
            ));
        } else if ours {
            out.push(tag(
                "tag.lane.semi_open_file",
                TagCategory::Positional,
                color,
                vec![sq],
                TagDetails::default(),
            ));
        }
    }
    out
}

fn seventh_rank_rooks(board: &Board, color: Color) -> Vec<Tag> {
    let seventh = if color == Color::White {
        Rank::Seventh
    } else {
        Rank::Second
    };
    board
        .by_piece(Piece {
            role: Role::Rook,
            color,
        })
        .into_iter()
        .filter(|sq| sq.rank() == seventh)
        .map(|sq| {
            tag(
                "tag.lane.seventh_rank",
                TagCategory::Positional,
                color,
                vec![sq],
                TagDetails::default(),
            )
        })
        .collect()
}

fn bad_bishops(board: &Board, color: Color) -> Vec<Tag> {
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
    let mut out = Vec::new();
    for sq in board.by_piece(Piece {
        role: Role::Bishop,
        color,
    }) {
        let light = sq.is_light();
        let count = central_pawns.into_iter().filter(|s| s.is_light() == light).count();
        if count >= 2 {
            out.push(tag(
                "tag.colour_complex.bad_bishop",
                TagCategory::Positional,
                color,
                vec![sq],
                TagDetails::default(),
            ));
        }
    }
    out
}

fn weak_square_control(board: &Board, color: Color) -> Vec<Tag> {
    let their_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color: !color,
    });
    let our_pieces = board.by_color(color) & !board.pawns() & !board.kings();
    let mut out = Vec::new();
    for sq in our_pieces {
        if !attacks::pawn_attacks(color, sq).intersect(their_pawns).is_empty() {
            continue;
        }
        let rank_idx = if color == Color::White {
            sq.rank() as u32
        } else {
            7 - sq.rank() as u32
        };
        if rank_idx >= 4 {
            out.push(tag(
                "tag.structure.weak_square_control",
                TagCategory::Positional,
                color,
                vec![sq],
                TagDetails::default(),
            ));
        }
    }
    out
}

fn king_shield_weak(board: &Board, color: Color) -> Vec<Tag> {
    let Some(king_sq) = board.king_of(color) else {
        return Vec::new();
    };
    let our_pawns = board.by_piece(Piece {
        role: Role::Pawn,
        color,
    });
    let shield_rank = if color == Color::White {
        king_sq.rank() as u32 + 1
    } else {
        (king_sq.rank() as u32).wrapping_sub(1)
    };
    if shield_rank >= 8 {
        return Vec::new();
    }
    let shield_sq = Square::from_coords(king_sq.file(), Rank::new(shield_rank));
    if (our_pawns & Bitboard::from(shield_sq)).is_empty() {
        vec![tag(
            "tag.king.shield_weak",
            TagCategory::Positional,
            color,
            vec![king_sq],
            TagDetails::default(),
        )]
    } else {
        Vec::new()
    }
}
