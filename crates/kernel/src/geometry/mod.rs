pub mod point;
pub mod vector;
pub mod frame;
pub mod transform;
pub mod nurbs;
pub mod curves;
pub mod surfaces;
pub mod polygon;
pub mod intersection;
pub mod surface_intersection;

pub use curves::{Curve, Ray};
pub use frame::Frame;
pub use point::{Point2d, Point3d};
pub use surfaces::Surface;
pub use transform::{BoundingBox, Transform};
pub use vector::{Vec2, Vec3};
