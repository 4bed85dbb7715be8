/// Wavefront OBJ reader and writer module.
pub mod obj;
