use crate::codec::bytes_to_embedding;
use crate::error::{DocShelfError, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the SQL function computing `docshelf_distance(metric, a, b)`.
pub(crate) const DISTANCE_FUNCTION: &str = "docshelf_distance";

/// Distance metric for nearest-neighbour searches. Smaller is closer for every
/// metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    #[default]
    Cosine,
    Euclidean,
    /// Negated dot product.
    InnerProduct,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "cosine",
            Distance::Euclidean => "euclidean",
            Distance::InnerProduct => "inner_product",
        }
    }

    /// Distance between two vectors. `None` when the dimensions differ or a
    /// cosine distance involves a zero vector.
    pub fn between(&self, a: &[f32], b: &[f32]) -> Option<f64> {
        if a.len() != b.len() || a.is_empty() {
            return None;
        }
        let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
        match self {
            Distance::Cosine => {
                let norm_a = norm(a);
                let norm_b = norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    return None;
                }
                Some(1.0 - dot / (norm_a * norm_b))
            }
            Distance::Euclidean => Some(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
                    .sum::<f64>()
                    .sqrt(),
            ),
            Distance::InnerProduct => Some(-dot),
        }
    }
}

fn norm(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt()
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distance {
    type Err = DocShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Distance::Cosine),
            "euclidean" => Ok(Distance::Euclidean),
            "inner_product" => Ok(Distance::InnerProduct),
            other => Err(DocShelfError::Config(format!("unknown distance metric '{other}'"))),
        }
    }
}

/// Register the distance function on a connection. Non-blob arguments and
/// mismatched dimensions yield SQL NULL.
pub(crate) fn register(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        DISTANCE_FUNCTION,
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let metric: String = ctx.get(0)?;
            let metric = metric
                .parse::<Distance>()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let (ValueRef::Blob(a), ValueRef::Blob(b)) = (ctx.get_raw(1), ctx.get_raw(2)) else {
                return Ok(None);
            };
            match (bytes_to_embedding(a), bytes_to_embedding(b)) {
                (Some(a), Some(b)) => Ok(metric.between(&a, &b)),
                _ => Ok(None),
            }
        },
    )?;
    Ok(())
}
