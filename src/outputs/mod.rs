//! Output generation.
//!
//! # Submodules
//!
//! - [`json`]: Writes normalized articles and the per-run report as JSON
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 2025-05-06/
//! │   └── <slug>.json
//! └── report.json
//! ```

pub mod json;
