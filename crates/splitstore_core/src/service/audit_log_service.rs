//! Application activity log service.
//!
//! # Responsibility
//! - Record who did what to which application, experiment or bucket.
//! - Serve per-application and global activity listings.
//!
//! # Invariants
//! - Listings are most recent first; equal timestamps keep reverse insertion order.
//! - Entries without an application are only visible through the global listings.

use crate::model::{ApplicationName, AuditLogEntry, GLOBAL_ENTRY_APPLICATION};
use crate::repo::audit_store::ApplicationAuditLogStore;
use crate::repo::error::{RepoError, RepoResult};
use log::{debug, info};

pub struct AuditLogService<S: ApplicationAuditLogStore> {
    store: S,
}

impl<S: ApplicationAuditLogStore> AuditLogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Appends one activity entry.
    ///
    /// # Errors
    /// - `InvalidArgument` when `user` is blank or a named application is blank or malformed.
    pub fn record(&self, entry: &AuditLogEntry) -> RepoResult<()> {
        if entry.user.trim().is_empty() {
            return Err(RepoError::InvalidArgument("audit user is required".to_string()));
        }
        if let Some(application) = &entry.application_name {
            if application.is_absent() {
                return Err(RepoError::InvalidArgument(
                    "application name is required".to_string(),
                ));
            }
            application.validate()?;
        }

        self.store.append(entry)?;
        info!(
            "event=auditlog_record module=service status=ok app={} action={}",
            entry.partition(),
            entry.action
        );
        Ok(())
    }

    /// Entries of one application, most recent first.
    pub fn get_audit_logs(&self, application: &ApplicationName) -> RepoResult<Vec<AuditLogEntry>> {
        if application.is_absent() {
            return Err(RepoError::InvalidArgument(
                "application name is required".to_string(),
            ));
        }
        application.validate()?;
        let entries = self.store.list_by_application(application.as_str())?;
        debug!(
            "event=auditlog_list module=service status=ok app={application} count={}",
            entries.len()
        );
        Ok(entries)
    }

    /// Entries recorded without an application.
    pub fn get_global_audit_logs(&self) -> RepoResult<Vec<AuditLogEntry>> {
        self.store.list_by_application(GLOBAL_ENTRY_APPLICATION)
    }

    /// Every entry, across applications, most recent first.
    pub fn get_all_audit_logs(&self) -> RepoResult<Vec<AuditLogEntry>> {
        self.store.list_all()
    }
}
