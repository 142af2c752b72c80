//! Move-list and last-move highlight readers (stage 3 of the pipeline).
//! The host page never exposes moves as data; the closest thing is the text of
//! its move log and the squares it tints after a move. Both are read here,
//! best effort: an empty token or an empty highlight list is a normal result.

use shakmaty::Square;

use crate::dom::{Document, Element, Selector};
use crate::locate::BoardGeometry;
use crate::snapshot::{SquareResolver, resolve_square};

/// Last whitespace-separated token of `text`, or empty.
pub fn last_token(text: &str) -> String {
    text.split_whitespace().last().unwrap_or_default().to_string()
}

/// Reads the newest move token from whichever move-log layout the page uses.
#[derive(Clone, Debug)]
pub struct MoveListReader {
    selectors: Vec<Selector>,
}

impl MoveListReader {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }

    /// Text of the first matching log, last token. Can be stale or partial
    /// while the log is still re-rendering.
    pub fn latest_token(&self, doc: &Document) -> String {
        self.selectors
            .iter()
            .find_map(|s| doc.query_first(s))
            .map(|(_, log)| last_token(&log.text_content()))
            .unwrap_or_default()
    }
}

/// Collects squares the page currently marks as part of the last move.
#[derive(Clone, Debug)]
pub struct HighlightReader {
    selectors: Vec<Selector>,
}

impl HighlightReader {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }

    /// Distinct flagged squares in document order.
    pub fn flagged_squares(
        &self,
        board: &Element,
        geometry: &BoardGeometry,
        resolvers: &[Box<dyn SquareResolver>],
    ) -> Vec<Square> {
        let mut squares: Vec<Square> = Vec::new();
        for selector in &self.selectors {
            for el in board.query_all(selector) {
                if let Some(sq) = resolve_square(el, geometry, resolvers) {
                    if !squares.contains(&sq) {
                        squares.push(sq);
                    }
                }
            }
        }
        squares
    }
}
