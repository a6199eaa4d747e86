//! Actor context for registry mutations
//!
//! Every mutation is stamped with the acting user and the jurisdiction
//! that user is assigned to. The context is passed explicitly into each
//! service call; nothing reads a "current user" from ambient state.

/// Acting user and assigned jurisdiction for one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorContext {
    /// Identifier of the operator performing the mutation
    pub user_id: String,
    /// Geographic code (usually a barangay) the operator is assigned to
    pub jurisdiction: String,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>, jurisdiction: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            jurisdiction: jurisdiction.into(),
        }
    }

    /// Context for maintenance jobs run by the registry itself
    pub fn system(jurisdiction: impl Into<String>) -> Self {
        Self::new("system", jurisdiction)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn jurisdiction(&self) -> &str {
        &self.jurisdiction
    }
}

impl std::fmt::Display for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActorContext({}@{})", self.user_id, self.jurisdiction)
    }
}
