pub mod brep;
pub mod builder;
pub mod domain;
pub mod primitives;
pub mod properties;
pub mod sew;
pub mod shape;
