//! [`Context`] partition key and [`Square`] board-cell labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Board edge length in cells.
pub const BOARD_CELLS: u8 = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SquareError {
    #[error("invalid square label '{0}'")]
    Invalid(String),
    #[error("square '{label}' is outside a {size}x{size} board")]
    OutOfBoard { label: String, size: u8 },
}

/// A board cell addressed by zero-based file (`a` = 0) and rank (`1` = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

impl Square {
    pub const fn new(file: u8, rank: u8) -> Self {
        Self { file, rank }
    }

    /// Parse a label such as `"e4"` on a board of `size` cells per side.
    pub fn parse_on(label: &str, size: u8) -> Result<Self, SquareError> {
        let label = label.trim();
        let mut chars = label.chars();
        let file_char = chars
            .next()
            .filter(|c| c.is_ascii_lowercase())
            .ok_or_else(|| SquareError::Invalid(label.to_string()))?;
        let rank: u8 = chars
            .as_str()
            .parse()
            .map_err(|_| SquareError::Invalid(label.to_string()))?;
        if rank == 0 {
            return Err(SquareError::Invalid(label.to_string()));
        }
        let file = file_char as u8 - b'a';
        let rank = rank - 1;
        if file >= size || rank >= size {
            return Err(SquareError::OutOfBoard {
                label: label.to_string(),
                size,
            });
        }
        Ok(Self { file, rank })
    }

    /// Every cell of the standard board, rank by rank.
    pub fn all() -> impl Iterator<Item = Square> {
        (0..BOARD_CELLS).flat_map(|rank| (0..BOARD_CELLS).map(move |file| Square { file, rank }))
    }

    /// Coarse region of the board: 2x2 blocks numbered `r0`..`r15`.
    pub fn region_id(&self) -> String {
        format!("r{}", (self.rank / 2) * 4 + self.file / 2)
    }
}

impl FromStr for Square {
    type Err = SquareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Square::parse_on(s, BOARD_CELLS)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, self.rank + 1)
    }
}

/// Situation key under which parameters are learned.
///
/// Contexts compare by their canonical serialization, see
/// [`Context::canonical_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub piece_class: String,
    pub region_id: Option<String>,
    pub square: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            piece_class: "unknown".to_string(),
            region_id: None,
            square: None,
        }
    }
}

impl Context {
    /// Context for a board square, with its region filled in.
    pub fn for_square(square: Square) -> Self {
        Self {
            square: Some(square.to_string()),
            region_id: Some(square.region_id()),
            ..Self::default()
        }
    }

    /// JSON object with lexicographically sorted keys.
    pub fn canonical_key(&self) -> String {
        // serde_json::Map is BTreeMap-backed, so keys come out sorted.
        serde_json::json!({
            "piece_class": self.piece_class,
            "region_id": self.region_id,
            "square": self.square,
        })
        .to_string()
    }

    /// Parse a context from a query-string JSON payload, falling back to the
    /// default context when absent or malformed.
    pub fn from_query(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}
