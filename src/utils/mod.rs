pub mod json;
pub mod pagination;
