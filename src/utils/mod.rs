//! Utility modules for device selection and checkpoint downloads.

mod device;
mod download;

pub use device::get_device;
pub use download::fetch_model;
