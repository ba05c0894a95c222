// src/storage/sqlite.rs
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{AclRule, Action, Domain, DomainPatch, RulePatch, SEQUENCE_LIMIT};

use super::traits::{Constraint, RuleStore, StoreError, StoreResult};

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Evaluation access; the file must already exist
    ReadOnly,
    /// Administration access; the file and schema are created if missing
    ReadWrite,
}

/// SQLite implementation of the RuleStore trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path` with a connection pool.
    pub async fn open(path: impl AsRef<Path>, mode: OpenMode) -> StoreResult<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single writer connection serializes administration commands
        let (options, max_connections) = match mode {
            OpenMode::ReadOnly => (options.read_only(true).create_if_missing(false), 4),
            OpenMode::ReadWrite => (options.create_if_missing(true), 1),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        info!(path = %path.display(), mode = ?mode, "Opened rule store");

        let store = Self { pool };
        if mode == OpenMode::ReadWrite {
            store.run_migrations().await?;
        }
        Ok(store)
    }

    /// Read-only store that connects on first use.
    ///
    /// A missing or unreadable file is not an error here; every read
    /// reports `StoreError::Unavailable` instead, and nothing is created.
    pub fn open_lazy(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        debug!(path = %path.display(), "Prepared lazy read-only rule store");
        Self { pool }
    }

    /// Create the relay tables if they do not exist.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(unavailable)
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn corrupt(e: sqlx::Error) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn domain_from_row(row: &SqliteRow) -> StoreResult<Domain> {
    Ok(Domain {
        name: row.try_get("domain").map_err(corrupt)?,
        implicit_action: Action::from_permit(row.try_get("implicit").map_err(corrupt)?),
        enabled: row.try_get("enabled").map_err(corrupt)?,
    })
}

fn sequence_from_db(sequence: i64) -> StoreResult<u32> {
    u32::try_from(sequence)
        .ok()
        .filter(|seq| *seq < SEQUENCE_LIMIT)
        .ok_or_else(|| StoreError::Corrupt(format!("sequence {} out of range", sequence)))
}

fn rule_from_row(domain: &str, row: &SqliteRow) -> StoreResult<AclRule> {
    let sequence = sequence_from_db(row.try_get("sequence").map_err(corrupt)?)?;

    Ok(AclRule {
        domain: domain.to_string(),
        sequence,
        user: row.try_get("user").map_err(corrupt)?,
        address: row.try_get("ip").map_err(corrupt)?,
        action: Action::from_permit(row.try_get("action").map_err(corrupt)?),
    })
}

async fn domain_exists(tx: &mut Transaction<'static, Sqlite>, name: &str) -> StoreResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relay_domains WHERE domain = ?")
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(unavailable)?;
    Ok(count > 0)
}

async fn rule_exists_in(
    tx: &mut Transaction<'static, Sqlite>,
    domain: &str,
    sequence: u32,
) -> StoreResult<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM relay_acls WHERE domain = ? AND sequence = ?")
            .bind(domain)
            .bind(sequence as i64)
            .fetch_one(&mut **tx)
            .await
            .map_err(unavailable)?;
    Ok(count > 0)
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn get_domain(&self, name: &str) -> StoreResult<Option<Domain>> {
        let row = sqlx::query(
            r#"
            SELECT domain, implicit, enabled
            FROM relay_domains
            WHERE domain = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(domain_from_row).transpose()
    }

    async fn list_domains(&self) -> StoreResult<Vec<Domain>> {
        sqlx::query(
            r#"
            SELECT domain, implicit, enabled
            FROM relay_domains
            ORDER BY domain ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?
        .iter()
        .map(domain_from_row)
        .collect()
    }

    async fn insert_domain(&self, domain: &Domain) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO relay_domains (domain, implicit, enabled)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&domain.name)
        .bind(domain.implicit_action.is_permit())
        .bind(domain.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::ConstraintViolation(Constraint::DuplicateDomain(domain.name.clone()))
            }
            _ => unavailable(e),
        })?;

        debug!(domain = %domain.name, "Inserted domain");
        Ok(())
    }

    async fn update_domain_implicit(&self, name: &str, action: Action) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE relay_domains SET implicit = ? WHERE domain = ?")
            .bind(action.is_permit())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_domain_enabled(&self, name: &str, enabled: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE relay_domains SET enabled = ? WHERE domain = ?")
            .bind(enabled)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_domain(&self, name: &str, patch: &DomainPatch) -> StoreResult<bool> {
        let mut tx = self.begin().await?;

        if !domain_exists(&mut tx, name).await? {
            return Ok(false);
        }

        if let Some(action) = patch.implicit_action {
            sqlx::query("UPDATE relay_domains SET implicit = ? WHERE domain = ?")
                .bind(action.is_permit())
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }
        if let Some(enabled) = patch.enabled {
            sqlx::query("UPDATE relay_domains SET enabled = ? WHERE domain = ?")
                .bind(enabled)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(true)
    }

    async fn delete_domain(&self, name: &str) -> StoreResult<bool> {
        // Rules go with the domain through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM relay_domains WHERE domain = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_rules(&self, domain: &str) -> StoreResult<Vec<AclRule>> {
        sqlx::query(
            r#"
            SELECT sequence, user, ip, action
            FROM relay_acls
            WHERE domain = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?
        .iter()
        .map(|row| rule_from_row(domain, row))
        .collect()
    }

    async fn max_sequence(&self, domain: &str) -> StoreResult<Option<u32>> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM relay_acls WHERE domain = ?")
                .bind(domain)
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;

        max.map(sequence_from_db).transpose()
    }

    async fn rule_exists(&self, domain: &str, sequence: u32) -> StoreResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM relay_acls WHERE domain = ? AND sequence = ?")
                .bind(domain)
                .bind(sequence as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(count > 0)
    }

    async fn insert_rule(&self, rule: &AclRule) -> StoreResult<()> {
        if rule.sequence >= SEQUENCE_LIMIT {
            return Err(StoreError::ConstraintViolation(Constraint::SequenceOutOfRange {
                domain: rule.domain.clone(),
                sequence: rule.sequence,
            }));
        }
        let mut tx = self.begin().await?;

        if !domain_exists(&mut tx, &rule.domain).await? {
            return Err(StoreError::ConstraintViolation(Constraint::UnknownDomain(
                rule.domain.clone(),
            )));
        }
        let duplicate = || {
            StoreError::ConstraintViolation(Constraint::DuplicateRule {
                domain: rule.domain.clone(),
                sequence: rule.sequence,
            })
        };
        if rule_exists_in(&mut tx, &rule.domain, rule.sequence).await? {
            return Err(duplicate());
        }

        sqlx::query(
            r#"
            INSERT INTO relay_acls (domain, sequence, user, ip, action)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.domain)
        .bind(rule.sequence as i64)
        .bind(rule.user.as_deref())
        .bind(rule.address.as_deref())
        .bind(rule.action.is_permit())
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => duplicate(),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::ConstraintViolation(Constraint::UnknownDomain(rule.domain.clone()))
            }
            _ => unavailable(e),
        })?;

        tx.commit().await.map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => duplicate(),
            _ => unavailable(e),
        })?;

        debug!(domain = %rule.domain, sequence = rule.sequence, "Inserted rule");
        Ok(())
    }

    async fn update_rule_user(
        &self,
        domain: &str,
        sequence: u32,
        user: Option<&str>,
    ) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE relay_acls SET user = ? WHERE domain = ? AND sequence = ?")
                .bind(user)
                .bind(domain)
                .bind(sequence as i64)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_rule_address(
        &self,
        domain: &str,
        sequence: u32,
        address: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE relay_acls SET ip = ? WHERE domain = ? AND sequence = ?")
            .bind(address)
            .bind(domain)
            .bind(sequence as i64)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_rule_action(
        &self,
        domain: &str,
        sequence: u32,
        action: Action,
    ) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE relay_acls SET action = ? WHERE domain = ? AND sequence = ?")
                .bind(action.is_permit())
                .bind(domain)
                .bind(sequence as i64)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_rule(
        &self,
        domain: &str,
        sequence: u32,
        patch: &RulePatch,
    ) -> StoreResult<bool> {
        let mut tx = self.begin().await?;

        if !rule_exists_in(&mut tx, domain, sequence).await? {
            return Ok(false);
        }

        if let Some(user) = &patch.user {
            sqlx::query("UPDATE relay_acls SET user = ? WHERE domain = ? AND sequence = ?")
                .bind(user.as_deref())
                .bind(domain)
                .bind(sequence as i64)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }
        if let Some(address) = &patch.address {
            sqlx::query("UPDATE relay_acls SET ip = ? WHERE domain = ? AND sequence = ?")
                .bind(address.as_deref())
                .bind(domain)
                .bind(sequence as i64)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }
        if let Some(action) = patch.action {
            sqlx::query("UPDATE relay_acls SET action = ? WHERE domain = ? AND sequence = ?")
                .bind(action.is_permit())
                .bind(domain)
                .bind(sequence as i64)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(true)
    }

    async fn delete_rule(&self, domain: &str, sequence: u32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM relay_acls WHERE domain = ? AND sequence = ?")
            .bind(domain)
            .bind(sequence as i64)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("relay_acl.db"), OpenMode::ReadWrite)
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_domain_round_trip() {
        let (_dir, store) = open_temp().await;
        let domain = Domain::new("example.com")
            .with_implicit(Action::Deny)
            .with_enabled(false);

        store.insert_domain(&domain).await.unwrap();

        assert_eq!(store.get_domain("example.com").await.unwrap(), Some(domain.clone()));
        assert_eq!(store.get_domain("EXAMPLE.COM").await.unwrap(), None);
        assert_eq!(store.list_domains().await.unwrap(), vec![domain]);
    }

    #[tokio::test]
    async fn test_rule_round_trip() {
        let (_dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();

        let first = AclRule::new("example.com", 20, Action::Permit);
        let second = AclRule::new("example.com", 10, Action::Deny)
            .with_user("alice")
            .with_address("10.0.0.0/8");
        store.insert_rule(&first).await.unwrap();
        store.insert_rule(&second).await.unwrap();

        let rules = store.list_rules("example.com").await.unwrap();
        assert_eq!(rules, vec![second, first]);
        assert_eq!(store.max_sequence("example.com").await.unwrap(), Some(20));
        assert_eq!(store.max_sequence("example.org").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_constraints() {
        let (_dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();

        let dup = store.insert_domain(&Domain::new("example.com")).await;
        assert!(matches!(
            dup,
            Err(StoreError::ConstraintViolation(Constraint::DuplicateDomain(_)))
        ));

        let rule = AclRule::new("example.com", 10, Action::Permit);
        store.insert_rule(&rule).await.unwrap();
        assert!(matches!(
            store.insert_rule(&rule).await,
            Err(StoreError::ConstraintViolation(Constraint::DuplicateRule { .. }))
        ));

        let orphan = AclRule::new("missing.com", 10, Action::Permit);
        assert!(matches!(
            store.insert_rule(&orphan).await,
            Err(StoreError::ConstraintViolation(Constraint::UnknownDomain(_)))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();
        store
            .insert_rule(&AclRule::new("example.com", 10, Action::Permit))
            .await
            .unwrap();

        assert!(store.delete_domain("example.com").await.unwrap());
        assert!(!store.rule_exists("example.com", 10).await.unwrap());
        assert!(!store.delete_domain("example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_and_delete_rule() {
        let (_dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();
        store
            .insert_rule(&AclRule::new("example.com", 10, Action::Permit).with_user("alice"))
            .await
            .unwrap();

        let patch = RulePatch {
            user: Some(None),
            address: Some(Some("::1/128".to_string())),
            action: None,
        };
        assert!(store.update_rule("example.com", 10, &patch).await.unwrap());
        assert!(!store.update_rule("example.com", 11, &patch).await.unwrap());
        assert!(store
            .update_rule_action("example.com", 10, Action::Deny)
            .await
            .unwrap());

        let rule = &store.list_rules("example.com").await.unwrap()[0];
        assert_eq!(rule.user, None);
        assert_eq!(rule.address.as_deref(), Some("::1/128"));
        assert_eq!(rule.action, Action::Deny);

        assert!(store
            .update_rule_user("example.com", 10, Some("bob"))
            .await
            .unwrap());
        assert!(store
            .update_rule_address("example.com", 10, None)
            .await
            .unwrap());
        assert!(!store
            .update_rule_user("example.com", 11, Some("bob"))
            .await
            .unwrap());
        assert!(!store
            .update_rule_address("example.com", 11, Some("10.0.0.0/8"))
            .await
            .unwrap());

        let rule = &store.list_rules("example.com").await.unwrap()[0];
        assert_eq!(rule.user.as_deref(), Some("bob"));
        assert_eq!(rule.address, None);
        assert_eq!(rule.action, Action::Deny);

        assert!(store.delete_rule("example.com", 10).await.unwrap());
        assert!(!store.rule_exists("example.com", 10).await.unwrap());
        assert!(!store.delete_rule("example.com", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_domain_patch() {
        let (_dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();

        let patch = DomainPatch {
            implicit_action: Some(Action::Deny),
            enabled: None,
        };
        assert!(store.update_domain("example.com", &patch).await.unwrap());
        assert!(!store.update_domain("missing.com", &patch).await.unwrap());

        let domain = store.get_domain("example.com").await.unwrap().unwrap();
        assert_eq!(domain.implicit_action, Action::Deny);
        assert!(domain.enabled);

        assert!(store
            .update_domain_implicit("example.com", Action::Permit)
            .await
            .unwrap());
        assert!(store
            .update_domain_enabled("example.com", false)
            .await
            .unwrap());
        assert!(!store
            .update_domain_implicit("missing.com", Action::Deny)
            .await
            .unwrap());
        assert!(!store
            .update_domain_enabled("missing.com", true)
            .await
            .unwrap());

        let domain = store.get_domain("example.com").await.unwrap().unwrap();
        assert_eq!(domain.implicit_action, Action::Permit);
        assert!(!domain.enabled);
    }

    #[tokio::test]
    async fn test_sequence_range_enforced() {
        let (_dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();

        for sequence in [SEQUENCE_LIMIT, u32::MAX] {
            let rule = AclRule::new("example.com", sequence, Action::Permit);
            assert!(matches!(
                store.insert_rule(&rule).await,
                Err(StoreError::ConstraintViolation(Constraint::SequenceOutOfRange { .. }))
            ));
        }

        // The schema rejects rows written around the store
        let raw = sqlx::query("INSERT INTO relay_acls (domain, sequence, action) VALUES (?, ?, 1)")
            .bind("example.com")
            .bind(i64::from(u32::MAX))
            .execute(store.pool())
            .await;
        assert!(raw.is_err());
        assert_eq!(store.max_sequence("example.com").await.unwrap(), None);
    }

    #[test]
    fn test_sequence_from_db() {
        assert_eq!(sequence_from_db(999).unwrap(), 999);
        assert!(matches!(sequence_from_db(1000), Err(StoreError::Corrupt(_))));
        assert!(matches!(sequence_from_db(-1), Err(StoreError::Corrupt(_))));
        assert!(matches!(sequence_from_db(i64::from(u32::MAX)), Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_read_only_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteStore::open(dir.path().join("missing.db"), OpenMode::ReadOnly).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_lazy_store_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let store = SqliteStore::open_lazy(&path);

        assert!(matches!(
            store.get_domain("example.com").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_read_only_sees_admin_writes() {
        let (dir, store) = open_temp().await;
        store.insert_domain(&Domain::new("example.com")).await.unwrap();
        store.close().await;

        let reader = SqliteStore::open(dir.path().join("relay_acl.db"), OpenMode::ReadOnly)
            .await
            .unwrap();
        assert!(reader.get_domain("example.com").await.unwrap().is_some());
        assert!(reader.insert_domain(&Domain::new("example.org")).await.is_err());
    }
}
