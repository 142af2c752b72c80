//! Snapshot builder (stage 2 of the detection pipeline).
//! Reads which piece stands on which square from the current board DOM.
//! Nothing on the page states a square authoritatively, so each piece element
//! goes through an ordered list of resolver strategies:
//! - **Data attribute**: `data-square="e4"`
//! - **Square class**: `square-e4`, or the digit-file form `square-54`
//! - **Pixel transform**: inline `translate(x, y)` divided by the square size
//!
//! Elements nothing can place (drag ghosts, overlays, coordinates) are skipped.

use shakmaty::{Color, Piece, Role, Square};
use std::collections::BTreeMap;
use tracing::trace;

use crate::dom::{Element, Selector};
use crate::locate::{BoardGeometry, square_at_index};

// *************** Pieces ***************

/// Parses `wk`/`BP` style codes or the long `white king` form.
pub fn parse_piece(code: &str) -> Option<Piece> {
    let code = code.trim();
    let mut chars = code.chars();
    if let (Some(c), Some(r), None) = (chars.next(), chars.next(), chars.next()) {
        let color = match c.to_ascii_lowercase() {
            'w' => Color::White,
            'b' => Color::Black,
            _ => return None,
        };
        let role = Role::from_char(r.to_ascii_lowercase())?;
        return Some(Piece { color, role });
    }

    let (color, role) = code.split_once(char::is_whitespace)?;
    let color = match color.to_ascii_lowercase().as_str() {
        "white" => Color::White,
        "black" => Color::Black,
        _ => return None,
    };
    let role = match role.trim().to_ascii_lowercase().as_str() {
        "pawn" => Role::Pawn,
        "knight" => Role::Knight,
        "bishop" => Role::Bishop,
        "rook" => Role::Rook,
        "queen" => Role::Queen,
        "king" => Role::King,
        _ => return None,
    };
    Some(Piece { color, role })
}

/// Long human form, e.g. `white king`.
pub fn describe_piece(piece: Piece) -> String {
    let color = match piece.color {
        Color::White => "white",
        Color::Black => "black",
    };
    let role = match piece.role {
        Role::Pawn => "pawn",
        Role::Knight => "knight",
        Role::Bishop => "bishop",
        Role::Rook => "rook",
        Role::Queen => "queen",
        Role::King => "king",
    };
    format!("{color} {role}")
}

/// Piece identity from `data-piece`, falling back to a two-character class code.
pub fn resolve_piece(el: &Element) -> Option<Piece> {
    el.attr("data-piece")
        .and_then(parse_piece)
        .or_else(|| el.classes.iter().filter(|c| c.len() == 2).find_map(|c| parse_piece(c)))
}

// *************** Square resolvers ***************

/// One way of reading a square off a piece element.
pub trait SquareResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, el: &Element, geometry: &BoardGeometry) -> Option<Square>;
}

/// `data-square="e4"` (or any other attribute name).
pub struct DataAttributeResolver {
    pub attribute: &'static str,
}

impl SquareResolver for DataAttributeResolver {
    fn name(&self) -> &'static str {
        "data-attribute"
    }

    fn resolve(&self, el: &Element, _geometry: &BoardGeometry) -> Option<Square> {
        el.attr(self.attribute)?.trim().parse().ok()
    }
}

/// `square-<file><rank>` with a letter file (`square-e4`) or digit file (`square-54`).
pub struct SquareClassResolver;

impl SquareClassResolver {
    fn parse_class(class: &str) -> Option<Square> {
        let coords = class.strip_prefix("square-")?.as_bytes();
        let [file, rank] = coords else {
            return None;
        };
        let file = match file {
            b'a'..=b'h' => file - b'a',
            b'1'..=b'8' => file - b'1',
            _ => return None,
        };
        let rank = match rank {
            b'1'..=b'8' => rank - b'1',
            _ => return None,
        };
        square_at_index(file as usize, rank as usize)
    }
}

impl SquareResolver for SquareClassResolver {
    fn name(&self) -> &'static str {
        "square-class"
    }

    fn resolve(&self, el: &Element, _geometry: &BoardGeometry) -> Option<Square> {
        el.classes.iter().find_map(|c| Self::parse_class(c))
    }
}

/// Inline transform offset mapped through the board geometry.
pub struct PixelTransformResolver;

impl SquareResolver for PixelTransformResolver {
    fn name(&self) -> &'static str {
        "pixel-transform"
    }

    fn resolve(&self, el: &Element, geometry: &BoardGeometry) -> Option<Square> {
        let (x, y) = el.translate()?;
        geometry.square_at(x, y)
    }
}

/// Data attribute, then class, then pixel position.
pub fn default_resolvers() -> Vec<Box<dyn SquareResolver>> {
    vec![
        Box::new(DataAttributeResolver { attribute: "data-square" }),
        Box::new(SquareClassResolver),
        Box::new(PixelTransformResolver),
    ]
}

/// Tries each resolver in order; first hit wins.
pub fn resolve_square(
    el: &Element,
    geometry: &BoardGeometry,
    resolvers: &[Box<dyn SquareResolver>],
) -> Option<Square> {
    resolvers.iter().find_map(|r| {
        let sq = r.resolve(el, geometry);
        if let Some(sq) = sq {
            trace!(resolver = r.name(), %sq, "square resolved");
        }
        sq
    })
}

// *************** Snapshot ***************

/// Square -> piece mapping captured at one instant. Rebuilt from scratch on
/// every pass; at most one piece per square.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardSnapshot {
    pieces: BTreeMap<Square, Piece>,
}

impl BoardSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts on the same square replace earlier ones.
    pub fn insert(&mut self, sq: Square, piece: Piece) {
        self.pieces.insert(sq, piece);
    }

    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.pieces.get(&sq).copied()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Occupied squares in ascending square order (a1, b1, ... h8).
    pub fn iter(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        self.pieces.iter().map(|(sq, p)| (*sq, *p))
    }

    /// Board part of a FEN, for logs.
    pub fn board_fen(&self) -> String {
        let mut fen = String::with_capacity(72);
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                match square_at_index(file, rank).and_then(|sq| self.get(sq)) {
                    Some(piece) => {
                        if empty > 0 {
                            fen.push_str(&empty.to_string());
                            empty = 0;
                        }
                        fen.push(piece.char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push_str(&empty.to_string());
            }
            if rank > 0 {
                fen.push('/');
            }
        }
        fen
    }

    /// Test/replay helper: `[("e1", "wk"), ("h1", "white rook")]`. Unparseable pairs are dropped.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut snapshot = Self::new();
        for (sq, code) in pairs {
            if let (Ok(sq), Some(piece)) = (sq.parse::<Square>(), parse_piece(code)) {
                snapshot.insert(sq, piece);
            }
        }
        snapshot
    }
}

/// Enumerates piece elements under `board` and places each one.
pub struct SnapshotBuilder {
    piece_selector: Selector,
    resolvers: Vec<Box<dyn SquareResolver>>,
}

impl SnapshotBuilder {
    pub fn new(piece_selector: Selector, resolvers: Vec<Box<dyn SquareResolver>>) -> Self {
        Self {
            piece_selector,
            resolvers,
        }
    }

    pub fn resolvers(&self) -> &[Box<dyn SquareResolver>] {
        &self.resolvers
    }

    pub fn build(&self, board: &Element, geometry: &BoardGeometry) -> BoardSnapshot {
        let mut snapshot = BoardSnapshot::new();
        for el in board.query_all(&self.piece_selector) {
            let Some(piece) = resolve_piece(el) else {
                continue;
            };
            let Some(sq) = resolve_square(el, geometry, &self.resolvers) else {
                continue;
            };
            snapshot.insert(sq, piece);
        }
        snapshot
    }
}
