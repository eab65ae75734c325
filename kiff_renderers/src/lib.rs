//! External tool integrations used to turn a layout document into rasters.

mod board;
mod kicad_cli;
mod pdftoppm;
mod process;

pub use board::{document_bounds, read_document_bounds};
pub use kicad_cli::KicadCliRenderer;
pub use pdftoppm::PdftoppmRasterizer;
pub use process::{ProcessOutput, ToolCommand, DEFAULT_TIMEOUT};
