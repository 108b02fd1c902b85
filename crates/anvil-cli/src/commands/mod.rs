pub mod batch;
pub mod common;
pub mod generate;
pub mod retexture;
