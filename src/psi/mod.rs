//! PSI (Program Specific Information) table codecs (spec §4.2, §4.3).
//!
//! The binary section model (`section`) and descriptor lists (`descriptor`)
//! are generic to every PSI table; `pmt` is the one table type this core
//! implements in full, exemplifying the pattern the rest follow.

pub mod descriptor;
pub mod pmt;
pub mod section;

pub use descriptor::{Descriptor, DescriptorList};
pub use pmt::{Pmt, Stream, TID_PMT};
pub use section::{BinaryTable, MAX_PSI_LONG_SECTION_PAYLOAD_SIZE};
