//! Board locator (stage 1 of the detection pipeline).
//! Finds the chessboard container on the host page by trying an ordered list
//! of selectors (the host site has shipped several layouts), reads which side
//! is rendered at the bottom, and derives the square <-> pixel geometry.
//! Cheap enough to call on every pass; the detector caches the result and
//! revalidates it after structural mutations.

use shakmaty::Square;
use tracing::debug;

use crate::dom::{Document, Element, ElementPath, Selector};
use crate::error::{DetectError, DetectResult};

/// Boards narrower than this are treated as not yet laid out (no pixel decoding).
pub const MIN_BOARD_PX: f64 = 64.0;

/// Which side is rendered at the bottom of the board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    White,
    Black,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Orientation::White => write!(f, "white"),
            Orientation::Black => write!(f, "black"),
        }
    }
}

/// Builds a square from zero-based file/rank indices, `None` when off the board.
pub fn square_at_index(file: usize, rank: usize) -> Option<Square> {
    if file > 7 || rank > 7 {
        return None;
    }
    Square::from_ascii(&[b'a' + file as u8, b'1' + rank as u8]).ok()
}

/// Zero-based (file, rank) indices of a square.
pub fn square_indices(sq: Square) -> (usize, usize) {
    let file = (sq.file().char() as u8 - b'a') as usize;
    let rank = (sq.rank().char() as u8 - b'1') as usize;
    (file, rank)
}

/// Square <-> board-relative pixel mapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardGeometry {
    /// Board edge length in pixels; 0 when unknown.
    pub size: f64,
    pub orientation: Orientation,
}

impl BoardGeometry {
    pub fn new(size: f64, orientation: Orientation) -> Self {
        Self { size, orientation }
    }

    pub fn square_size(&self) -> f64 {
        self.size / 8.0
    }

    pub fn has_pixels(&self) -> bool {
        self.size >= MIN_BOARD_PX
    }

    /// Decodes a translation offset (top-left of a piece) to the square it sits on.
    /// Indices are `floor((offset + 0.5) / (size / 8))`: the plain integer division
    /// with half a pixel of slack, so `x = 59.7` on a 480px board is file b, not a.
    /// White: file = fileIndex, rank = 8 - rankIndex. Black: file = 7 - fileIndex, rank = rankIndex + 1.
    pub fn square_at(&self, x: f64, y: f64) -> Option<Square> {
        if !self.has_pixels() {
            return None;
        }
        let step = self.square_size();
        // Half-pixel tolerance for subpixel transforms.
        let file_index = ((x + 0.5) / step).floor();
        let rank_index = ((y + 0.5) / step).floor();
        if !(0.0..8.0).contains(&file_index) || !(0.0..8.0).contains(&rank_index) {
            return None;
        }
        let (fi, ri) = (file_index as usize, rank_index as usize);
        match self.orientation {
            Orientation::White => square_at_index(fi, 7 - ri),
            Orientation::Black => square_at_index(7 - fi, ri),
        }
    }

    /// Board-relative pixel center of `sq`.
    pub fn square_center(&self, sq: Square) -> Option<(f64, f64)> {
        if !self.has_pixels() {
            return None;
        }
        let (file, rank) = square_indices(sq);
        let (fi, ri) = match self.orientation {
            Orientation::White => (file, 7 - rank),
            Orientation::Black => (7 - file, rank),
        };
        let step = self.square_size();
        Some(((fi as f64 + 0.5) * step, (ri as f64 + 0.5) * step))
    }

    pub fn center(&self) -> (f64, f64) {
        (self.size / 2.0, self.size / 2.0)
    }
}

/// Where the board is and how it is drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct BoardLocation {
    pub path: ElementPath,
    pub geometry: BoardGeometry,
}

impl BoardLocation {
    pub fn orientation(&self) -> Orientation {
        self.geometry.orientation
    }
}

/// Reads orientation from class names or a data attribute; white when undetermined.
pub fn orientation_of(board: &Element) -> Orientation {
    let flagged_black = board.has_class("flipped")
        || board.has_class("orientation-black")
        || ["data-orientation", "orientation"]
            .iter()
            .any(|name| board.attr(name).is_some_and(|v| v.eq_ignore_ascii_case("black")));
    if flagged_black {
        Orientation::Black
    } else {
        Orientation::White
    }
}

#[derive(Clone, Debug)]
pub struct BoardLocator {
    selectors: Vec<Selector>,
}

impl BoardLocator {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }

    /// First selector with a match wins; the board's rect width gives the geometry.
    pub fn locate(&self, doc: &Document) -> DetectResult<BoardLocation> {
        for selector in &self.selectors {
            if let Some((path, board)) = doc.query_first(selector) {
                let orientation = orientation_of(board);
                let size = board.rect.map(|r| r.width).unwrap_or(0.0);
                if size < MIN_BOARD_PX {
                    debug!(size, "board found but not laid out, pixel decoding disabled");
                }
                debug!(?path, %orientation, size, "board located");
                return Ok(BoardLocation {
                    path,
                    geometry: BoardGeometry::new(size, orientation),
                });
            }
        }
        Err(DetectError::BoardNotFound)
    }

    /// A cached location is still good if its path resolves to an element one of
    /// our selectors accepts, at the same size and orientation.
    pub fn is_current(&self, doc: &Document, cached: &BoardLocation) -> bool {
        doc.get(&cached.path).is_some_and(|el| {
            self.selectors.iter().any(|s| s.matches(el))
                && orientation_of(el) == cached.orientation()
                && el.rect.map(|r| r.width).unwrap_or(0.0) == cached.geometry.size
        })
    }
}
