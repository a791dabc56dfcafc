use serde::{Deserialize, Serialize};

/// Classification of a known grid cell.
///
/// `MutableObstacle` covers anything clearable (terrain obstacles and loose
/// blocks); `FixedObstacle` covers cells that can never be traversed, such as
/// another team's entities or a dispenser footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Empty,
    MutableObstacle,
    FixedObstacle,
}

impl CellType {
    /// Whether an agent could ever stand here, possibly after clearing.
    pub fn is_traversable(self) -> bool {
        !matches!(self, CellType::FixedObstacle)
    }

    pub fn is_obstacle(self) -> bool {
        matches!(self, CellType::MutableObstacle)
    }
}
