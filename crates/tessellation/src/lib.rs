//! Triangle meshes from boundary representations.
//!
//! [`tessellate`] discretizes every edge once, meshes each face in its
//! parameter space against the shared boundary samples, and concatenates
//! the face meshes into one [`TriangleMesh`]. Vertices lie on the true
//! surfaces, triangles follow face orientation, and adjacent faces meet on
//! identical boundary points.

pub mod edges;
pub mod face;
pub mod mesh;
pub mod params;

pub use mesh::TriangleMesh;
pub use params::MeshParameters;

use brep_kernel::error::{ErrorKind, GeometryError, TopologyError};
use brep_kernel::Shape;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, instrument};

use crate::face::{mesh_face, FaceMesh};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TessellationError {
    /// Inverted surface, self-intersecting parameter domain, or the
    /// triangle budget ran out.
    #[error("tessellation failed: {0}")]
    TessellationFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl TessellationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TessellationFailure(_) => ErrorKind::NumericalNonConvergence,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Topology(e) => e.kind(),
            Self::Geometry(e) => e.kind(),
        }
    }

    pub(crate) fn failure(reason: impl Into<String>) -> Self {
        Self::TessellationFailure(reason.into())
    }
}

/// Mesh every face of `shape` within the bounds of `params`.
#[instrument(skip_all, fields(deflection = params.deflection, parallel = params.parallel))]
pub fn tessellate(shape: &Shape, params: &MeshParameters) -> Result<TriangleMesh, TessellationError> {
    params.validate()?;
    let store = shape.store();
    let faces = shape.faces();
    let samples = edges::discretize_edges(store, &shape.edges(), params);

    let meshed: Vec<FaceMesh> = if params.parallel {
        faces
            .par_iter()
            .map(|&f| mesh_face(store, f, &samples, params))
            .collect::<Result<_, _>>()?
    } else {
        faces
            .iter()
            .map(|&f| mesh_face(store, f, &samples, params))
            .collect::<Result<_, _>>()?
    };

    let total: usize = meshed.iter().map(|m| m.triangles.len()).sum();
    if total > params.max_triangles {
        return Err(TessellationError::failure(format!(
            "{total} triangles exceed the limit of {}",
            params.max_triangles
        )));
    }

    let mut mesh = TriangleMesh::new();
    for (index, fm) in meshed.iter().enumerate() {
        let offset = mesh.vertex_count() as u32;
        for (p, n) in fm.points.iter().zip(&fm.normals) {
            mesh.add_vertex(*p, *n);
        }
        for [a, b, c] in &fm.triangles {
            mesh.add_triangle(a + offset, b + offset, c + offset, index as u32);
        }
    }
    let welded = mesh.weld(params.angle);

    info!(
        faces = faces.len(),
        vertices = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        welded,
        "tessellation complete"
    );
    Ok(mesh)
}
