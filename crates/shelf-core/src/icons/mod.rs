pub mod corpus;
pub mod index;
pub mod sections;

pub use corpus::{AppStreamCorpus, ProcessAppStreamCorpus, parse_scan_output};
pub use index::{IconIndex, IndexState, base_name, name_variants};
pub use sections::{GENERIC_PACKAGE_ICON, main_section, section_icon};
