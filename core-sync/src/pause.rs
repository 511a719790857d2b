//! # Pause Registry
//!
//! Single resolver for every pause scope. Scopes nest:
//!
//! ```text
//! Server
//! └── Project
//!     └── Representation
//!         └── Site (persisted `paused` flag on SiteFileState rows)
//! ```
//!
//! A scope is paused when it or any enclosing scope is paused. The server,
//! project and representation scopes are process state, not persisted; the
//! site scope lives in the store so it survives restarts.
//!
//! Transfer planning and the query layer both read a [`PauseSnapshot`]
//! taken once per pass, so every row of a page is judged against the same
//! pause state.

use crate::model::{RepresentationId, SiteFileState};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Scope to resolve a pause for
#[derive(Debug, Clone, Copy)]
pub enum PauseScope<'a> {
    Server,
    Project(&'a str),
    Representation {
        project: &'a str,
        representation_id: &'a RepresentationId,
    },
    /// A representation's record on one site
    Site {
        project: &'a str,
        representation_id: &'a RepresentationId,
        state: &'a SiteFileState,
    },
}

/// Point-in-time copy of the in-memory pause scopes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseSnapshot {
    server: bool,
    projects: HashSet<String>,
    representations: HashSet<(String, RepresentationId)>,
}

impl PauseSnapshot {
    /// Whether `scope` or any scope enclosing it is paused
    pub fn is_paused(&self, scope: PauseScope<'_>) -> bool {
        match scope {
            PauseScope::Server => self.server,
            PauseScope::Project(project) => self.server || self.projects.contains(project),
            PauseScope::Representation {
                project,
                representation_id,
            } => {
                self.is_paused(PauseScope::Project(project))
                    || self
                        .representations
                        .contains(&(project.to_string(), *representation_id))
            }
            PauseScope::Site {
                project,
                representation_id,
                state,
            } => {
                state.paused
                    || self.is_paused(PauseScope::Representation {
                        project,
                        representation_id,
                    })
            }
        }
    }
}

/// Shared, mutable pause state
#[derive(Debug, Default)]
pub struct PauseRegistry {
    state: RwLock<PauseSnapshot>,
}

impl PauseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the state changed
    pub async fn set_server(&self, paused: bool) -> bool {
        let mut state = self.state.write().await;
        let changed = state.server != paused;
        state.server = paused;
        changed
    }

    /// Returns `true` if the state changed
    pub async fn set_project(&self, project: &str, paused: bool) -> bool {
        let mut state = self.state.write().await;
        if paused {
            state.projects.insert(project.to_string())
        } else {
            state.projects.remove(project)
        }
    }

    /// Returns `true` if the state changed
    pub async fn set_representation(
        &self,
        project: &str,
        representation_id: &RepresentationId,
        paused: bool,
    ) -> bool {
        let mut state = self.state.write().await;
        let key = (project.to_string(), *representation_id);
        if paused {
            state.representations.insert(key)
        } else {
            state.representations.remove(&key)
        }
    }

    pub async fn snapshot(&self) -> PauseSnapshot {
        self.state.read().await.clone()
    }

    pub async fn is_paused(&self, scope: PauseScope<'_>) -> bool {
        self.state.read().await.is_paused(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enclosing_scopes_compose() {
        let registry = PauseRegistry::new();
        let repre = RepresentationId::new();
        let rep_scope = PauseScope::Representation {
            project: "demo",
            representation_id: &repre,
        };

        assert!(!registry.is_paused(rep_scope).await);

        registry.set_project("demo", true).await;
        assert!(registry.is_paused(rep_scope).await);
        assert!(!registry.is_paused(PauseScope::Project("other")).await);

        registry.set_project("demo", false).await;
        registry.set_server(true).await;
        assert!(registry.is_paused(rep_scope).await);
        assert!(registry.is_paused(PauseScope::Project("other")).await);
    }

    #[tokio::test]
    async fn test_set_reports_change_once() {
        let registry = PauseRegistry::new();
        let repre = RepresentationId::new();

        assert!(registry.set_representation("demo", &repre, true).await);
        assert!(!registry.set_representation("demo", &repre, true).await);
        assert!(registry.set_representation("demo", &repre, false).await);
        assert!(!registry.set_representation("demo", &repre, false).await);

        assert!(registry.set_server(true).await);
        assert!(!registry.set_server(true).await);
    }

    #[tokio::test]
    async fn test_site_scope_reads_persisted_flag() {
        let registry = PauseRegistry::new();
        let repre = RepresentationId::new();
        let mut state = SiteFileState::new("gdrive");

        let snapshot = registry.snapshot().await;
        assert!(!snapshot.is_paused(PauseScope::Site {
            project: "demo",
            representation_id: &repre,
            state: &state,
        }));

        state.paused = true;
        assert!(snapshot.is_paused(PauseScope::Site {
            project: "demo",
            representation_id: &repre,
            state: &state,
        }));
    }

    #[tokio::test]
    async fn test_representation_pause_is_project_scoped() {
        let registry = PauseRegistry::new();
        let repre = RepresentationId::new();
        registry.set_representation("demo", &repre, true).await;

        let snapshot = registry.snapshot().await;
        assert!(snapshot.is_paused(PauseScope::Representation {
            project: "demo",
            representation_id: &repre,
        }));
        assert!(!snapshot.is_paused(PauseScope::Representation {
            project: "other",
            representation_id: &repre,
        }));
    }
}
