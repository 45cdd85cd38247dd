//! Rules for the unit right triangle and tetrahedron.

use crate::{Error, Rule};

/// Triangle rules of strength 1 (centroid) or 2 (three interior points).
pub fn triangle(strength: usize) -> Result<Rule<2>, Error> {
    match strength {
        0 | 1 => Ok((vec![0.5], vec![[1.0 / 3.0, 1.0 / 3.0]])),
        2 => {
            let w = 1.0 / 6.0;
            let a = 1.0 / 6.0;
            let b = 2.0 / 3.0;
            Ok((vec![w, w, w], vec![[a, a], [b, a], [a, b]]))
        }
        _ => Err(Error::NoRuleAvailable { requested: strength }),
    }
}

/// Tetrahedron rules of strength 1 (centroid) or 2 (four interior points).
pub fn tetrahedron(strength: usize) -> Result<Rule<3>, Error> {
    match strength {
        0 | 1 => Ok((vec![1.0 / 6.0], vec![[0.25, 0.25, 0.25]])),
        2 => {
            let w = 1.0 / 24.0;
            let a = 0.138_196_601_125_010_5;
            let b = 0.585_410_196_624_968_5;
            Ok((
                vec![w, w, w, w],
                vec![[a, a, a], [b, a, a], [a, b, a], [a, a, b]],
            ))
        }
        _ => Err(Error::NoRuleAvailable { requested: strength }),
    }
}
