pub mod bind_group;
pub mod descriptor_pool;
