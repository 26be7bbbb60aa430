//! Flat, indented view of a DICOM data set with edits addressed by row.
//!
//! [`flatten`] projects the tree onto rows, [`path`] maps a selected row
//! back to its position in the tree, and [`mutate`] applies one change
//! there. [`session::Session`] ties these together for one open file.

pub mod config;
pub mod dicom;
pub mod error;
pub mod flatten;
pub mod launch;
pub mod logging;
pub mod mutate;
pub mod path;
pub mod policy;
pub mod row;
pub mod session;

pub use error::EditError;
pub use session::Session;
