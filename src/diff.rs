//! Diff engine (stage 4 of the pipeline).
//! Infers a single move from two successive snapshots. Rules are tried from
//! most to least specific and the first match wins; anything ambiguous gives
//! up with `None` instead of guessing.

use shakmaty::{Piece, Role, Square};

use crate::snapshot::BoardSnapshot;

/// A move inferred from one snapshot pair. Lives for one reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveCandidate {
    pub from: Option<Square>,
    pub to: Option<Square>,
    pub is_capture: bool,
}

/// Squares that differ between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDelta {
    /// In `prev`, empty in `next`.
    pub vacated: Vec<Square>,
    /// Newly filled in `next`, or holding a different piece than in `prev`.
    pub occupied: Vec<Square>,
    /// Filled in both with different pieces (a capture landed there).
    pub changed: Vec<Square>,
}

impl SnapshotDelta {
    pub fn between(prev: &BoardSnapshot, next: &BoardSnapshot) -> Self {
        let mut delta = SnapshotDelta::default();
        for (sq, before) in prev.iter() {
            match next.get(sq) {
                None => delta.vacated.push(sq),
                Some(after) if after != before => {
                    delta.changed.push(sq);
                    delta.occupied.push(sq);
                }
                Some(_) => {}
            }
        }
        for (sq, _) in next.iter() {
            if prev.get(sq).is_none() {
                delta.occupied.push(sq);
            }
        }
        delta.occupied.sort();
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.vacated.is_empty() && self.occupied.is_empty()
    }
}

fn is_role(piece: Option<Piece>, role: Role) -> bool {
    piece.is_some_and(|p| p.role == role)
}

/// A pawn landing on another file can only have captured.
fn pawn_changed_file(piece: Option<Piece>, from: Square, to: Square) -> bool {
    is_role(piece, Role::Pawn) && from.file() != to.file()
}

/// Infers the move that turns `prev` into `next`, if there is exactly one.
pub fn diff_snapshots(prev: &BoardSnapshot, next: &BoardSnapshot) -> Option<MoveCandidate> {
    let delta = SnapshotDelta::between(prev, next);

    match (delta.vacated.as_slice(), delta.occupied.as_slice()) {
        // Simple move, possibly capturing on the destination.
        ([from], [to]) => {
            let moved = next.get(*to);
            Some(MoveCandidate {
                from: Some(*from),
                to: Some(*to),
                is_capture: !delta.changed.is_empty() || pawn_changed_file(moved, *from, *to),
            })
        }

        // En passant: the capturing pawn's origin and the captured pawn's square
        // both empty out, one square fills. The origin is the vacated square that
        // held the arriving pawn.
        ([_, _], [to]) if is_role(next.get(*to), Role::Pawn) => {
            let moved = next.get(*to);
            let from = delta.vacated.iter().copied().find(|sq| prev.get(*sq) == moved)?;
            pawn_changed_file(moved, from, *to).then_some(MoveCandidate {
                from: Some(from),
                to: Some(*to),
                is_capture: true,
            })
        }

        // Castling: king and rook both relocate.
        ([first, _], [_, _]) => {
            let king_to = delta
                .occupied
                .iter()
                .copied()
                .find(|sq| is_role(next.get(*sq), Role::King))?;
            let king_from = delta
                .vacated
                .iter()
                .copied()
                .find(|sq| is_role(prev.get(*sq), Role::King))
                .unwrap_or(*first);
            Some(MoveCandidate {
                from: Some(king_from),
                to: Some(king_to),
                is_capture: false,
            })
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn snap(pairs: &[(&str, &str)]) -> BoardSnapshot {
        BoardSnapshot::from_pairs(pairs)
    }

    fn mv(from: &str, to: &str, is_capture: bool) -> Option<MoveCandidate> {
        Some(MoveCandidate {
            from: Some(sq(from)),
            to: Some(sq(to)),
            is_capture,
        })
    }

    #[test]
    fn test_simple_quiet_move() {
        let prev = snap(&[("g1", "wn"), ("e8", "bk")]);
        let next = snap(&[("f3", "wn"), ("e8", "bk")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("g1", "f3", false));
    }

    #[test]
    fn test_capture_on_changed_square() {
        let prev = snap(&[("e4", "white pawn"), ("d5", "black pawn")]);
        let next = snap(&[("d5", "white pawn")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("e4", "d5", true));
    }

    #[test]
    fn test_piece_capture_is_flagged_only_by_changed_square() {
        let prev = snap(&[("c4", "wb"), ("f7", "bp"), ("a7", "bp")]);
        let next = snap(&[("f7", "wb"), ("a7", "bp")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("c4", "f7", true));

        let prev = snap(&[("c4", "wb")]);
        let next = snap(&[("f7", "wb")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("c4", "f7", false));
    }

    #[test]
    fn test_en_passant_file_mismatch() {
        let prev = snap(&[("e5", "white pawn"), ("d5", "black pawn")]);
        let next = snap(&[("d6", "white pawn")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("e5", "d6", true));
    }

    #[test]
    fn test_pawn_push_is_not_capture() {
        let prev = snap(&[("e2", "wp")]);
        let next = snap(&[("e4", "wp")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("e2", "e4", false));
    }

    #[test]
    fn test_promotion_falls_through_simple_rule() {
        let prev = snap(&[("e7", "wp")]);
        let next = snap(&[("e8", "wq")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("e7", "e8", false));
    }

    #[test]
    fn test_kingside_castle() {
        let prev = snap(&[("e1", "white king"), ("h1", "white rook")]);
        let next = snap(&[("g1", "white king"), ("f1", "white rook")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("e1", "g1", false));
    }

    #[test]
    fn test_queenside_castle_black() {
        let prev = snap(&[("e8", "bk"), ("a8", "br"), ("h8", "br")]);
        let next = snap(&[("c8", "bk"), ("d8", "br"), ("h8", "br")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("e8", "c8", false));
    }

    #[test]
    fn test_castle_origin_falls_back_to_first_vacated() {
        // King never read on a vacated square (e.g. it rendered late): origin is the first vacated square.
        let prev = snap(&[("a1", "wr"), ("h1", "wr")]);
        let next = snap(&[("g1", "wk"), ("f1", "wr")]);
        assert_eq!(diff_snapshots(&prev, &next), mv("a1", "g1", false));
    }

    #[test]
    fn test_two_piece_change_without_king_is_ambiguous() {
        let prev = snap(&[("b1", "wn"), ("g1", "wn")]);
        let next = snap(&[("c3", "wn"), ("f3", "wn")]);
        assert_eq!(diff_snapshots(&prev, &next), None);
    }

    #[test]
    fn test_no_vacated_square_is_rejected() {
        let prev = snap(&[("e1", "white king")]);
        let next = snap(&[("e1", "white king"), ("g1", "white rook")]);
        assert_eq!(diff_snapshots(&prev, &next), None);
    }

    #[test]
    fn test_large_change_is_rejected() {
        // New game set up: many squares change at once
        let prev = snap(&[("e4", "wp"), ("e5", "bp"), ("f3", "wn"), ("c6", "bn")]);
        let next = snap(&[("e2", "wp"), ("e7", "bp"), ("g1", "wn"), ("b8", "bn")]);
        assert_eq!(diff_snapshots(&prev, &next), None);
    }

    #[test]
    fn test_identical_snapshots() {
        let s = snap(&[("e1", "wk"), ("e8", "bk")]);
        assert_eq!(diff_snapshots(&s, &s), None);
        assert!(SnapshotDelta::between(&s, &s).is_empty());
    }

    #[test]
    fn test_delta_classification() {
        let prev = snap(&[("e4", "wp"), ("d5", "bp"), ("a1", "wr")]);
        let next = snap(&[("d5", "wp"), ("a1", "wr"), ("h7", "bq")]);
        let delta = SnapshotDelta::between(&prev, &next);
        assert_eq!(delta.vacated, vec![sq("e4")]);
        assert_eq!(delta.occupied, vec![sq("d5"), sq("h7")]);
        assert_eq!(delta.changed, vec![sq("d5")]);
    }

    #[test]
    fn test_simple_move_property_over_board() {
        // Every rook hop on an otherwise fixed board is recovered exactly.
        let fixed = [("e1", "wk"), ("e8", "bk")];
        for from in ["a1", "a8", "d4", "h3"] {
            for to in ["b2", "c7", "h8"] {
                let mut prev = snap(&fixed);
                prev.insert(sq(from), parse("wr"));
                let mut next = snap(&fixed);
                next.insert(sq(to), parse("wr"));
                assert_eq!(diff_snapshots(&prev, &next), mv(from, to, false), "{from}->{to}");
            }
        }
    }

    fn parse(code: &str) -> Piece {
        crate::snapshot::parse_piece(code).unwrap()
    }
}
