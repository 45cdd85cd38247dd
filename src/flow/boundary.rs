use serde::{Deserialize, Serialize};

/// What a Dirichlet pressure condition is applied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirichletTarget {
    /// The faces of a named boundary stencil.
    Faces { set: String },
    /// Cells of one (region, sub-region) block.
    Cells {
        region: usize,
        sub_region: usize,
        cells: Vec<usize>,
    },
}

/// Prescribed pressure `scale * table(t)`, or `scale` when the table is empty.
///
/// The table is a list of `(time, factor)` pairs sorted by time, interpolated linearly and
/// held constant outside its range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirichletCondition {
    pub target: DirichletTarget,
    pub scale: f64,
    #[serde(default)]
    pub time_table: Vec<(f64, f64)>,
}

impl DirichletCondition {
    pub fn face_pressure(set: impl Into<String>, pressure: f64) -> Self {
        Self {
            target: DirichletTarget::Faces { set: set.into() },
            scale: pressure,
            time_table: Vec::new(),
        }
    }

    pub fn cell_pressure(region: usize, sub_region: usize, cells: Vec<usize>, pressure: f64) -> Self {
        Self {
            target: DirichletTarget::Cells {
                region,
                sub_region,
                cells,
            },
            scale: pressure,
            time_table: Vec::new(),
        }
    }

    pub fn with_time_table(self, time_table: Vec<(f64, f64)>) -> Self {
        Self { time_table, ..self }
    }

    pub fn value(&self, time: f64) -> f64 {
        self.scale * interpolate(&self.time_table, time)
    }
}

fn interpolate(table: &[(f64, f64)], time: f64) -> f64 {
    let (Some(&(t_first, v_first)), Some(&(t_last, v_last))) = (table.first(), table.last()) else {
        return 1.0;
    };
    if time <= t_first {
        return v_first;
    }
    if time >= t_last {
        return v_last;
    }
    let upper = table.partition_point(|&(t, _)| t <= time);
    let (t0, v0) = table[upper - 1];
    let (t1, v1) = table[upper];
    if t1 == t0 {
        v1
    } else {
        v0 + (v1 - v0) * (time - t0) / (t1 - t0)
    }
}
