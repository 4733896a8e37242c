//! Team model.

use super::User;
use serde::{Deserialize, Serialize};

/// A named team and its members.
///
/// The name is immutable once created. Members carry the team name as well,
/// so a `Team` read back from storage is self-consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub team_name: String,
    pub members: Vec<User>,
}

impl Team {
    /// Build a team, stamping every member with the team name.
    pub fn new(team_name: impl Into<String>, members: Vec<User>) -> Self {
        let team_name = team_name.into();
        let members = members
            .into_iter()
            .map(|member| User {
                team_name: team_name.clone(),
                ..member
            })
            .collect();
        Self { team_name, members }
    }
}
