//! Node Lifecycle Mode

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle mode of a flock node.
///
/// Every node boots in `Pending`. A node leaves `Pending` exactly once, either
/// because an operator told it to run the controller or because a controller
/// adopted it. `Pending` is re-entered only when a join attempt fails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlockMode {
    /// Unclaimed, advertising itself and waiting for adoption
    Pending,
    /// Runs the control plane and adopts pending nodes
    Controller,
    /// Adopted and joined to a controller's cluster
    Agent,
}

impl FlockMode {
    /// Numeric encoding used by the mode gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            FlockMode::Pending => 0.0,
            FlockMode::Controller => 1.0,
            FlockMode::Agent => 2.0,
        }
    }
}

/// Role a controller assigns to a node it adopts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Controller,
    Agent,
}

impl Role {
    /// Mode a node ends up in after accepting this role.
    pub fn target_mode(&self) -> FlockMode {
        match self {
            Role::Controller => FlockMode::Controller,
            Role::Agent => FlockMode::Agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_mode_display_and_parse() {
        assert_eq!(FlockMode::Pending.to_string(), "pending");
        assert_eq!(FlockMode::from_str("controller").unwrap(), FlockMode::Controller);
        assert!(FlockMode::from_str("leader").is_err());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Agent).unwrap();
        assert_eq!(json, "\"agent\"");
        assert_eq!(Role::Agent.target_mode(), FlockMode::Agent);
        assert_eq!(Role::Controller.target_mode(), FlockMode::Controller);
    }
}
