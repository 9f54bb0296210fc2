//! Per-layer handlers of the coordinator.
//!
//! Each module adds an `impl Coordinator` block for one layer of the task
//! graph and defines the layer-specific state its tasks carry.

mod fetch_data;
mod fetch_image;
mod load_data;
mod load_image;

pub(crate) use fetch_data::FetchDataState;
pub(crate) use fetch_image::FetchImageState;
pub(crate) use load_data::LoadDataState;
pub(crate) use load_image::LoadImageState;
