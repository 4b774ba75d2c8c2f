//! Orderings rendered to the remote sort string.

use super::expr::FieldPath;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Asc
    }
}

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: FieldPath,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Render an ordering as `field,-other`. Empty yields `None` so the caller
/// omits the sort parameter.
pub fn compile_sort(order: &[OrderBy]) -> Option<String> {
    if order.is_empty() {
        return None;
    }

    let keys: Vec<String> = order
        .iter()
        .map(|o| match o.direction {
            Direction::Asc => o.field.to_string(),
            Direction::Desc => format!("-{}", o.field),
        })
        .collect();
    Some(keys.join(","))
}
