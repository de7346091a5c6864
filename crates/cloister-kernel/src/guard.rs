//! Access guard
//!
//! Every read and write a worker issues against its workspace passes through
//! [`AccessGuard::check`]. The decision depends only on `(role, path, action)`
//! and the capability table; the single side effect is one audit record per
//! call. Deny rules take precedence, and a path no rule matches is denied.

use crate::audit::{AuditLog, AuditRecord, Decision};
use crate::capability::{CapabilityTable, Evaluation};
use crate::error::{CapabilityError, DenialReason};
use crate::types::{Action, Role, WorkspaceStatus};
use cloister_artifact::{LogicalPath, Namespace, WorkspaceId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Guard verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Request may proceed
    Allowed {
        /// Parsed path
        path: LogicalPath,
        /// Namespace of the matching allow rule
        namespace: Namespace,
        /// Rendered matching rule
        rule: String,
    },
    /// Request refused
    Denied(DenialReason),
}

impl AccessDecision {
    /// Whether the request may proceed
    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }
}

/// Granted access, returned by [`AccessGuard::authorize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Parsed path, safe to join onto the workspace root
    pub path: LogicalPath,
    /// Namespace of the matching allow rule
    pub namespace: Namespace,
}

/// Capability enforcement point
#[derive(Debug)]
pub struct AccessGuard {
    table: Arc<CapabilityTable>,
    audit: Arc<AuditLog>,
}

impl AccessGuard {
    /// Create new guard over a validated table
    #[must_use]
    pub fn new(table: Arc<CapabilityTable>, audit: Arc<AuditLog>) -> Self {
        Self { table, audit }
    }

    /// Capability table in force
    #[inline]
    #[must_use]
    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Audit log receiving decisions
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Pure decision for `(role, path, action)`, without auditing
    #[must_use]
    pub fn decide(&self, role: Role, path: &str, action: Action) -> AccessDecision {
        let path = match path.parse::<LogicalPath>() {
            Ok(path) => path,
            Err(e) => {
                return AccessDecision::Denied(DenialReason::PathTraversal {
                    detail: e.to_string(),
                })
            }
        };
        match self.table.set(role).evaluate(&path, action) {
            Evaluation::Allowed(rule) => AccessDecision::Allowed {
                namespace: rule.namespace(),
                rule: rule.to_string(),
                path,
            },
            Evaluation::Denied(rule) => AccessDecision::Denied(DenialReason::ExplicitDeny {
                rule: rule.to_string(),
            }),
            Evaluation::Unmatched => AccessDecision::Denied(DenialReason::NoMatchingRule),
        }
    }

    /// Decide and append one audit record
    pub fn check(
        &self,
        workspace_id: WorkspaceId,
        role: Role,
        path: &str,
        action: Action,
    ) -> AccessDecision {
        let decision = self.decide(role, path, action);
        let (verdict, detail) = match &decision {
            AccessDecision::Allowed { rule, .. } => {
                debug!(%workspace_id, %role, path, %action, rule = %rule, "access allowed");
                (Decision::Allowed, rule.clone())
            }
            AccessDecision::Denied(reason) => {
                warn!(%workspace_id, %role, path, %action, reason = %reason, "access denied");
                (Decision::Denied, reason.to_string())
            }
        };
        self.audit.record_access(AuditRecord {
            workspace_id,
            role,
            path: path.to_string(),
            action,
            decision: verdict,
            detail,
        });
        decision
    }

    /// [`check`](Self::check), converting a denial into [`CapabilityError`]
    ///
    /// # Errors
    /// Returns [`CapabilityError`] naming the denial reason.
    pub fn authorize(
        &self,
        workspace_id: WorkspaceId,
        role: Role,
        path: &str,
        action: Action,
    ) -> Result<Grant, CapabilityError> {
        match self.check(workspace_id, role, path, action) {
            AccessDecision::Allowed {
                path, namespace, ..
            } => Ok(Grant { path, namespace }),
            AccessDecision::Denied(reason) => Err(CapabilityError {
                workspace_id,
                role,
                path: path.to_string(),
                action,
                reason,
            }),
        }
    }

    /// Record and return a denial caused by workspace state rather than rules
    pub fn deny(
        &self,
        workspace_id: WorkspaceId,
        role: Role,
        path: &str,
        action: Action,
        reason: DenialReason,
    ) -> CapabilityError {
        warn!(%workspace_id, %role, path, %action, reason = %reason, "access denied");
        self.audit.record_access(AuditRecord {
            workspace_id,
            role,
            path: path.to_string(),
            action,
            decision: Decision::Denied,
            detail: reason.to_string(),
        });
        CapabilityError {
            workspace_id,
            role,
            path: path.to_string(),
            action,
            reason,
        }
    }

    /// Denial for a workspace in `status`
    pub fn deny_inactive(
        &self,
        workspace_id: WorkspaceId,
        role: Role,
        path: &str,
        action: Action,
        status: WorkspaceStatus,
    ) -> CapabilityError {
        self.deny(
            workspace_id,
            role,
            path,
            action,
            DenialReason::WorkspaceNotActive { status },
        )
    }
}
