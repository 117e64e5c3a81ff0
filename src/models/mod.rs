pub mod status;
pub mod workbook;

pub use status::*;
pub use workbook::*;
