//! Persistence collaborators. The controller never calls these; callers hand
//! finished results over themselves.

pub mod csv_writer;
pub mod image_archiver;

pub use csv_writer::CsvWriter;
pub use image_archiver::{ImageArchiver, ImageVariant};
