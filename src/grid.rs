//! Serpentine ordering of a rectangular tile grid.
//!
//! Tiles are acquired in a raster scan that reverses direction on every row.
//! [`order`] turns the acquisition index of each tile into its position on
//! the grid, starting from any of the four corners.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// Starting Corner
// =============================================================================

/// Corner of the grid where the acquisition started.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StartingCorner {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl StartingCorner {
    pub const ALL: [StartingCorner; 4] = [
        StartingCorner::TopLeft,
        StartingCorner::TopRight,
        StartingCorner::BottomLeft,
        StartingCorner::BottomRight,
    ];

    pub fn is_left(self) -> bool {
        matches!(self, StartingCorner::TopLeft | StartingCorner::BottomLeft)
    }

    pub fn is_bottom(self) -> bool {
        matches!(
            self,
            StartingCorner::BottomLeft | StartingCorner::BottomRight
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StartingCorner::TopLeft => "top-left",
            StartingCorner::TopRight => "top-right",
            StartingCorner::BottomLeft => "bottom-left",
            StartingCorner::BottomRight => "bottom-right",
        }
    }
}

impl fmt::Display for StartingCorner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartingCorner {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top-left" => Ok(StartingCorner::TopLeft),
            "top-right" => Ok(StartingCorner::TopRight),
            "bottom-left" => Ok(StartingCorner::BottomLeft),
            "bottom-right" => Ok(StartingCorner::BottomRight),
            _ => Err(ConfigError::UnknownCorner(s.to_string())),
        }
    }
}

// =============================================================================
// Grid Layout
// =============================================================================

/// Acquisition indices arranged row by row.
///
/// `layout.get(r, c)` is the index of the tile acquired at grid position
/// `(r, c)`. The flattened entries always form a permutation of
/// `[0, rows * columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    rows: usize,
    columns: usize,
    entries: Vec<usize>,
}

impl GridLayout {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tile indices of row `r`, left to right.
    pub fn row(&self, r: usize) -> &[usize] {
        let start = (r * self.columns).min(self.entries.len());
        let end = (start + self.columns).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Tile index at `(row, column)`.
    pub fn get(&self, row: usize, column: usize) -> Option<usize> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.entries.get(row * self.columns + column).copied()
    }

    /// Grid position `(row, column)` of a tile index.
    pub fn position_of(&self, index: usize) -> Option<(usize, usize)> {
        self.entries
            .iter()
            .position(|&e| e == index)
            .map(|p| (p / self.columns, p % self.columns))
    }

    /// Flattened entries in raster order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.entries
    }
}

/// Arrange `rows * columns` acquisition indices on the grid.
///
/// Acquisition index `k` belongs to acquisition row `k / columns`. Row `r`
/// is reversed when `(r + left) % 2 == 0`, where `left` is 1 for left
/// corners. Bottom corners then reverse the order of the rows.
pub fn order(corner: StartingCorner, rows: usize, columns: usize) -> Result<GridLayout, ConfigError> {
    if rows == 0 || columns == 0 {
        return Err(ConfigError::InvalidGrid { rows, columns });
    }

    let left = usize::from(corner.is_left());
    let mut blocks: Vec<Vec<usize>> = (0..rows)
        .map(|r| {
            let mut row: Vec<usize> = (r * columns..(r + 1) * columns).collect();
            if (r + left) % 2 == 0 {
                row.reverse();
            }
            row
        })
        .collect();

    if corner.is_bottom() {
        blocks.reverse();
    }

    Ok(GridLayout {
        rows,
        columns,
        entries: blocks.into_iter().flatten().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_corners() {
        for corner in StartingCorner::ALL {
            assert_eq!(corner.as_str().parse::<StartingCorner>().unwrap(), corner);
        }
        assert_eq!(
            "Bottom-Right".parse::<StartingCorner>().unwrap(),
            StartingCorner::BottomRight
        );
        assert!(matches!(
            "middle".parse::<StartingCorner>(),
            Err(ConfigError::UnknownCorner(_))
        ));
    }

    #[test]
    fn test_order_is_permutation() {
        for corner in StartingCorner::ALL {
            for rows in 1..6 {
                for columns in 1..6 {
                    let layout = order(corner, rows, columns).unwrap();
                    let mut sorted: Vec<usize> = layout.iter().collect();
                    sorted.sort_unstable();
                    assert_eq!(sorted, (0..rows * columns).collect::<Vec<_>>());
                }
            }
        }
    }

    #[test]
    fn test_rows_are_contiguous() {
        for corner in StartingCorner::ALL {
            let layout = order(corner, 4, 5).unwrap();
            for r in 0..4 {
                let row = layout.row(r);
                for pair in row.windows(2) {
                    assert_eq!((pair[0] as i64 - pair[1] as i64).abs(), 1);
                }
            }
        }
    }

    #[test]
    fn test_top_left_two_by_three() {
        let layout = order(StartingCorner::TopLeft, 2, 3).unwrap();
        assert_eq!(layout.as_slice(), &[0, 1, 2, 5, 4, 3]);
        assert_eq!(layout.get(1, 0), Some(5));
        assert_eq!(layout.position_of(3), Some((1, 2)));
    }

    #[test]
    fn test_bottom_right_reverses_top_left() {
        let top_left: Vec<usize> = order(StartingCorner::TopLeft, 2, 3).unwrap().iter().collect();
        let bottom_right: Vec<usize> = order(StartingCorner::BottomRight, 2, 3)
            .unwrap()
            .iter()
            .collect();

        assert_eq!(bottom_right, vec![3, 4, 5, 2, 1, 0]);
        let reversed: Vec<usize> = top_left.into_iter().rev().collect();
        assert_eq!(bottom_right, reversed);
    }

    #[test]
    fn test_right_corner_starts_reversed() {
        let layout = order(StartingCorner::TopRight, 2, 3).unwrap();
        assert_eq!(layout.as_slice(), &[2, 1, 0, 3, 4, 5]);
    }

    #[test]
    fn test_empty_grid_is_error() {
        assert_eq!(
            order(StartingCorner::TopLeft, 0, 3),
            Err(ConfigError::InvalidGrid {
                rows: 0,
                columns: 3
            })
        );
        assert!(order(StartingCorner::TopLeft, 2, 0).is_err());
    }
}
