pub mod converters;
pub mod filetypes;
pub mod peaks;
pub mod signal;
pub mod thz;

pub use converters::{construct_metadata, convert_to_csv, ConvertedFile};
pub use filetypes::{Filetype, FiletypeRegistry};
pub use peaks::find_peaks;
