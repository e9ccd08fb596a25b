//! Channel geometry and spatial neighbourhoods.

use std::path::Path;

use crate::error::{Error, Result};

/// Fixed 2-D position of every recording channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelGeometry {
    positions: Vec<[f32; 2]>,
}

impl ChannelGeometry {
    pub fn new(positions: Vec<[f32; 2]>) -> Self {
        Self { positions }
    }

    /// Channels on a vertical line, `pitch` apart.
    pub fn linear(n_channels: usize, pitch: f32) -> Self {
        Self::new((0..n_channels).map(|c| [0.0, c as f32 * pitch]).collect())
    }

    /// Parse a whitespace or comma separated text file with one `x y` pair per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut positions = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values: Vec<f32> = line
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<f32>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| {
                    Error::InvalidTemplates(format!("geometry line {}: {}", line_no + 1, e))
                })?;
            if values.len() != 2 {
                return Err(Error::InvalidTemplates(format!(
                    "geometry line {}: expected 2 coordinates, got {}",
                    line_no + 1,
                    values.len()
                )));
            }
            positions.push([values[0], values[1]]);
        }
        Ok(Self::new(positions))
    }

    pub fn n_channels(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, channel: usize) -> [f32; 2] {
        self.positions[channel]
    }

    pub fn distance(&self, a: usize, b: usize) -> f32 {
        let [ax, ay] = self.positions[a];
        let [bx, by] = self.positions[b];
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Neighbour lists: channels strictly closer than `radius`, excluding co-located ones.
    pub fn neighbors(&self, radius: f32) -> Vec<Vec<usize>> {
        let n = self.n_channels();
        (0..n)
            .map(|a| {
                (0..n)
                    .filter(|&b| {
                        let d = self.distance(a, b);
                        d > 0.0 && d < radius
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_neighbors() {
        let geometry = ChannelGeometry::linear(4, 40.0);
        let neighbors = geometry.neighbors(70.0);
        assert_eq!(neighbors[0], vec![1]);
        assert_eq!(neighbors[1], vec![0, 2]);
        assert_eq!(neighbors[3], vec![2]);
    }

    #[test]
    fn test_colocated_channels_are_not_neighbors() {
        let geometry = ChannelGeometry::new(vec![[0.0, 0.0], [0.0, 0.0], [10.0, 0.0]]);
        let neighbors = geometry.neighbors(70.0);
        assert_eq!(neighbors[0], vec![2]);
        assert_eq!(neighbors[2], vec![0, 1]);
    }

    #[test]
    fn test_parse() {
        let text = "# probe\n0 0\n16.0, 20\n\n-16 40\n";
        let geometry = ChannelGeometry::parse(text).unwrap();
        assert_eq!(geometry.n_channels(), 3);
        assert_eq!(geometry.position(2), [-16.0, 40.0]);
    }

    #[test]
    fn test_parse_rejects_bad_line() {
        assert!(ChannelGeometry::parse("0 0 0\n").is_err());
        assert!(ChannelGeometry::parse("0 abc\n").is_err());
    }
}
