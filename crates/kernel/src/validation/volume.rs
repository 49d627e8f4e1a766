use tracing::debug;

use crate::topology::brep::*;
use crate::topology::properties::shell_volume;
use crate::topology::shape::Shape;

use super::config::ValidationConfig;
use super::types::*;

/// Outer shells of solids must enclose positive volume and voids negative.
/// Returns the net enclosed volume.
pub(crate) fn check_volume(shape: &Shape, config: &ValidationConfig, findings: &mut Findings) -> f64 {
    let store = shape.store();
    let mut total = 0.0;
    for solid in shape.solids() {
        let s = &store.solids[solid];
        for shell in s.shells() {
            let outer = shell == s.outer;
            let volume = match shell_volume(store, &store.shells[shell].faces, config.volume_deflection) {
                Ok(v) => v,
                Err(e) => {
                    findings.push(
                        ValidationIssue::error(
                            ErrorCode::NegativeVolume,
                            ShapeRef::Shell(shell),
                            format!("enclosed volume could not be integrated: {e}"),
                        )
                        .in_parent(ShapeRef::Solid(solid)),
                    );
                    continue;
                }
            };
            total += volume;
            if (volume > 0.0) != outer {
                let role = if outer { "outer shell" } else { "void" };
                findings.push(
                    ValidationIssue::error(
                        ErrorCode::NegativeVolume,
                        ShapeRef::Shell(shell),
                        format!("{role} encloses volume {volume:.6e}; check face orientation"),
                    )
                    .in_parent(ShapeRef::Solid(solid))
                    .measured(volume, 0.0),
                );
            }
        }
    }
    debug!(volume = total, "volume check complete");
    total
}
