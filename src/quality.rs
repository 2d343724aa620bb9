// Echo Downloader - download, merge and tag pipeline for Echo extensions
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Quality tier selection
//!
//! Used twice per download: once to pick a server among a track's servers and
//! once to pick a source among the server's sources.
//!
//! | tier  | picks                                              |
//! |-------|----------------------------------------------------|
//! | `"0"` | highest score (first one on ties)                  |
//! | `"1"` | index `len / 2` after a stable sort by score       |
//! | `"2"` | lowest score (first one on ties)                   |
//! | other | first candidate in list order                      |

/// Parsed quality tier setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Highest,
    Medium,
    Lowest,
    /// Anything else, selects the first candidate
    Unrecognized,
}

impl QualityTier {
    pub fn parse(tier: &str) -> Self {
        match tier {
            "0" => QualityTier::Highest,
            "1" => QualityTier::Medium,
            "2" => QualityTier::Lowest,
            _ => QualityTier::Unrecognized,
        }
    }
}

/// Index of the candidate selected for `tier`, `None` for an empty list
pub fn select_index<T, F>(candidates: &[T], tier: &str, score: F) -> Option<usize>
where
    F: Fn(&T) -> i64,
{
    if candidates.is_empty() {
        return None;
    }

    match QualityTier::parse(tier) {
        // Reversed so that max_by_key, which keeps the last maximum, lands on the first one
        QualityTier::Highest => candidates
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, c)| score(c))
            .map(|(i, _)| i),
        QualityTier::Medium => {
            let mut order: Vec<usize> = (0..candidates.len()).collect();
            order.sort_by_key(|&i| score(&candidates[i]));
            order.get(candidates.len() / 2).copied()
        }
        QualityTier::Lowest => candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| score(c))
            .map(|(i, _)| i),
        QualityTier::Unrecognized => Some(0),
    }
}

/// Candidate selected for `tier`
pub fn select<'a, T, F>(candidates: &'a [T], tier: &str, score: F) -> Option<&'a T>
where
    F: Fn(&T) -> i64,
{
    select_index(candidates, tier, score).map(|i| &candidates[i])
}
