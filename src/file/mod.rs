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


//! File naming and placement
//!
//! - `paths` - sanitizing, unique names inside a directory
//! - `manager` - destination folders, relocation, cleanup

pub mod manager;
pub mod paths;

// Re-export commonly used types
pub use manager::{remove_dir_quietly, remove_quietly, FileManager};
pub use paths::{copy_unique, sanitize, unique_file};
