pub mod machines;
pub mod normalize;
pub mod roadmap;
pub mod techniques;
