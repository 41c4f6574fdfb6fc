pub mod applications;
pub mod export;
pub mod periods;
