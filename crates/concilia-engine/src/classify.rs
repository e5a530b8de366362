//! Group classification.

use concilia_config::{grupo, status};

/// Floating-point tolerance for "equal" sums.
pub const EPSILON: f64 = 1e-6;

/// Normalize an amount to 6-decimal precision.
pub fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: &'static str,
    pub grupo: &'static str,
}

/// Classify one match group from its (already rounded) side sums.
///
/// The immaterial bucket only exists when a positive limit is configured;
/// with `limite = 0` any non-zero difference is material.
pub fn classify(
    has_a: bool,
    has_b: bool,
    value_a: f64,
    value_b: f64,
    limite: f64,
) -> Classification {
    if !(has_a && has_b) {
        return Classification {
            status: status::NAO_ENCONTRADO,
            grupo: grupo::NAO_ENCONTRADO,
        };
    }

    let diff = value_a - value_b;
    let abs_diff = diff.abs();
    if abs_diff <= EPSILON {
        Classification {
            status: status::CONCILIADO,
            grupo: grupo::CONCILIADO,
        }
    } else if limite > 0.0 && abs_diff <= limite.max(EPSILON) {
        Classification {
            status: status::ENCONTRADO_COM_DIFERENCA,
            grupo: grupo::DIFERENCA_IMATERIAL,
        }
    } else if diff > 0.0 {
        Classification {
            status: status::ENCONTRADO_COM_DIFERENCA,
            grupo: grupo::BASE_A_MAIOR,
        }
    } else {
        Classification {
            status: status::ENCONTRADO_COM_DIFERENCA,
            grupo: grupo::BASE_B_MAIOR,
        }
    }
}
