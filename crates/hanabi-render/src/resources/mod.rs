pub mod resource_data;
pub mod resource_manager;

pub use resource_data::*;
pub use resource_manager::{BindingUpdateDescriptor, RenderResourceManager};
