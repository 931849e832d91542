pub mod budget;
pub mod patterns;
pub mod plan;
pub mod render;
pub mod selector;
pub mod truncation;
