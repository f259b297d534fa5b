// clasper-store-sqlite/src/store.rs
// ============================================================================
// Module: Clasper SQLite Store
// Description: Durable backing for every clasper-core interfaces:: contract,
// plus the runtime's TelemetrySinks trait, behind one SQLite connection.
// Purpose: Give the policy, adapter registry, tool token, approval queue,
// audit log, trace, tenant budget, and telemetry sink concerns a single
// crash-consistent home, with the hash-chain and single-use transitions each
// implemented as one atomic critical section.
// Dependencies: clasper-core, rusqlite, serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! [`ClasperSqliteStore`] owns one `SQLite` connection behind a
//! [`std::sync::Mutex`] and implements every storage trait `clasper-core`
//! defines. The per-tenant audit sequence lock, the per-execution trace
//! sequence lock, and the tool-token/decision compare-and-swap transitions
//! are each a single transaction held only across the critical section, not
//! across signature verification or network work — that work happens in the
//! runtime layer, above this crate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use clasper_core::AdapterId;
use clasper_core::AdapterRegistration;
use clasper_core::AdapterRegistryError;
use clasper_core::AdapterRegistryStore;
use clasper_core::ApprovalQueueError;
use clasper_core::ApprovalQueueStore;
use clasper_core::AuditEntry;
use clasper_core::AuditLogError;
use clasper_core::AuditLogStore;
use clasper_core::Decision;
use clasper_core::DecisionId;
use clasper_core::DecisionState;
use clasper_core::ExecutionId;
use clasper_core::GENESIS_HASH;
use clasper_core::Policy;
use clasper_core::PolicyId;
use clasper_core::PolicyStore;
use clasper_core::PolicyStoreError;
use clasper_core::ReasonCode;
use clasper_core::RiskClass;
use clasper_core::SignatureAlgorithm;
use clasper_core::StepId;
use clasper_core::TelemetryKey;
use clasper_core::TelemetrySinkError;
use clasper_core::TelemetrySinks;
use clasper_core::TenantBudgetError;
use clasper_core::TenantBudgetStore;
use clasper_core::TenantId;
use clasper_core::Timestamp;
use clasper_core::TokenId;
use clasper_core::ToolTokenClaims;
use clasper_core::ToolTokenRow;
use clasper_core::ToolTokenStore;
use clasper_core::ToolTokenStoreError;
use clasper_core::TraceStep;
use clasper_core::TraceStepKind;
use clasper_core::TraceStore;
use clasper_core::TraceStoreError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the Clasper `SQLite` store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors, internal to this crate.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Invalid or corrupt persisted data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteStoreError> for PolicyStoreError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for AdapterRegistryError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for ToolTokenStoreError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for ApprovalQueueError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for AuditLogError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for TraceStoreError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for TenantBudgetError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<SqliteStoreError> for TelemetrySinkError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Io(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed storage for every Clasper interfaces:: contract.
#[derive(Clone)]
pub struct ClasperSqliteStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared `SQLite` connection guarded by a mutex; every operation holds
    /// the lock only across its own transaction.
    connection: Arc<Mutex<Connection>>,
}

impl ClasperSqliteStore {
    /// Opens a Clasper `SQLite` store, creating and migrating its schema as
    /// needed.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { config, connection: Arc::new(Mutex::new(connection)) })
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Returns the path of the underlying `SQLite` database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

// ============================================================================
// SECTION: Setup Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid("store path contains an overlong component".to_string()));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid("store path must be a file, not a directory".to_string()));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates an existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS policies (
                    tenant_id TEXT NOT NULL,
                    policy_id TEXT NOT NULL,
                    data TEXT NOT NULL,
                    PRIMARY KEY (tenant_id, policy_id)
                );
                CREATE TABLE IF NOT EXISTS adapter_registry (
                    tenant_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    version TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    risk_class TEXT NOT NULL,
                    capabilities TEXT NOT NULL,
                    enabled INTEGER NOT NULL,
                    PRIMARY KEY (tenant_id, adapter_id)
                );
                CREATE TABLE IF NOT EXISTS adapter_telemetry_keys (
                    key_seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    algorithm TEXT NOT NULL,
                    public_jwk TEXT NOT NULL,
                    key_id TEXT,
                    created_at TEXT NOT NULL,
                    revoked_at TEXT,
                    FOREIGN KEY (tenant_id, adapter_id) REFERENCES adapter_registry(tenant_id, adapter_id)
                        ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_adapter_telemetry_keys_active
                    ON adapter_telemetry_keys (tenant_id, adapter_id, revoked_at);
                CREATE TABLE IF NOT EXISTS tool_tokens (
                    jti TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    execution_id TEXT NOT NULL,
                    tool TEXT NOT NULL,
                    scope_hash TEXT NOT NULL,
                    issued_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    used_at TEXT
                );
                CREATE TABLE IF NOT EXISTS decisions (
                    decision_id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    execution_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    state TEXT NOT NULL,
                    request_snapshot TEXT NOT NULL,
                    required_role TEXT,
                    created_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    resolved_at TEXT,
                    resolved_by TEXT,
                    reason_code TEXT,
                    justification TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_decisions_tenant_state_expiry
                    ON decisions (tenant_id, state, expires_at);
                CREATE TABLE IF NOT EXISTS audit_chain (
                    tenant_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    event_type TEXT NOT NULL,
                    occurred_at TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    target_id TEXT,
                    event_data TEXT NOT NULL,
                    prev_hash TEXT NOT NULL,
                    entry_hash TEXT NOT NULL,
                    PRIMARY KEY (tenant_id, seq)
                );
                CREATE TABLE IF NOT EXISTS trace_steps (
                    execution_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    step_id TEXT NOT NULL,
                    detail TEXT NOT NULL,
                    occurred_at TEXT NOT NULL,
                    prev_step_hash TEXT NOT NULL,
                    step_hash TEXT NOT NULL,
                    PRIMARY KEY (execution_id, seq)
                );
                CREATE INDEX IF NOT EXISTS idx_trace_steps_execution_started
                    ON trace_steps (execution_id, occurred_at DESC);
                CREATE TABLE IF NOT EXISTS tenant_budgets (
                    tenant_id TEXT PRIMARY KEY,
                    remaining_budget REAL
                );
                CREATE TABLE IF NOT EXISTS telemetry_cost_reports (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS telemetry_metrics_reports (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS telemetry_violations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    adapter_id TEXT NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS telemetry_ingest_ledger (
                    dedup_key TEXT PRIMARY KEY
                );",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Timestamp Conversion
// ============================================================================

/// Formats a [`Timestamp`] as the RFC 3339 string stored in every `TEXT`
/// timestamp column.
fn timestamp_to_sql(value: Timestamp) -> Result<String, SqliteStoreError> {
    value.as_offset_date_time().format(&Rfc3339).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Parses an RFC 3339 string back into a [`Timestamp`].
fn timestamp_from_sql(value: &str) -> Result<Timestamp, SqliteStoreError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map(Timestamp::from_offset_date_time)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Formats an optional [`Timestamp`].
fn optional_timestamp_to_sql(value: Option<Timestamp>) -> Result<Option<String>, SqliteStoreError> {
    value.map(timestamp_to_sql).transpose()
}

/// Parses an optional RFC 3339 string.
fn optional_timestamp_from_sql(value: Option<String>) -> Result<Option<Timestamp>, SqliteStoreError> {
    value.as_deref().map(timestamp_from_sql).transpose()
}

// ============================================================================
// SECTION: Policy Store
// ============================================================================

impl PolicyStore for ClasperSqliteStore {
    fn load(&self, tenant_id: &TenantId) -> Result<Vec<Policy>, PolicyStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT data FROM policies WHERE tenant_id = ?1")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![tenant_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut policies = Vec::new();
        for row in rows {
            let data = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let policy: Policy = serde_json::from_str(&data).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            if policy.enabled {
                policies.push(policy);
            }
        }
        Ok(policies)
    }

    fn upsert(&self, policy: Policy) -> Result<(), PolicyStoreError> {
        let data = serde_json::to_string(&policy).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO policies (tenant_id, policy_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT (tenant_id, policy_id) DO UPDATE SET data = excluded.data",
                params![policy.scope.tenant_id.as_str(), policy.policy_id.as_str(), data],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Adapter Registry Store
// ============================================================================

/// Loads the active (most recently created, non-revoked) telemetry key for
/// an adapter, if any.
fn load_active_key(connection: &Connection, tenant_id: &TenantId, adapter_id: &AdapterId) -> Result<Option<TelemetryKey>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT algorithm, public_jwk, key_id, created_at, revoked_at FROM adapter_telemetry_keys
             WHERE tenant_id = ?1 AND adapter_id = ?2 AND revoked_at IS NULL
             ORDER BY key_seq DESC LIMIT 1",
            params![tenant_id.as_str(), adapter_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let Some((algorithm, public_jwk, key_id, created_at, revoked_at)) = row else {
        return Ok(None);
    };
    let algorithm: SignatureAlgorithm = serde_json::from_str(&algorithm).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let public_jwk: serde_json::Value = serde_json::from_str(&public_jwk).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    Ok(Some(TelemetryKey {
        algorithm,
        public_jwk,
        key_id: key_id.map(clasper_core::KeyId::new),
        created_at: timestamp_from_sql(&created_at)?,
        revoked_at: optional_timestamp_from_sql(revoked_at)?,
    }))
}

/// Builds an [`AdapterRegistration`] from a base row and its active key.
#[allow(clippy::too_many_arguments, reason = "assembles one flat registration row")]
fn build_registration(
    tenant_id: &TenantId,
    adapter_id: &AdapterId,
    version: String,
    display_name: String,
    risk_class: String,
    capabilities: String,
    enabled: bool,
    active_key: Option<TelemetryKey>,
) -> Result<AdapterRegistration, SqliteStoreError> {
    let risk_class: RiskClass = serde_json::from_str(&risk_class).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let capabilities: Vec<String> = serde_json::from_str(&capabilities).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    Ok(AdapterRegistration {
        tenant_id: tenant_id.clone(),
        adapter_id: adapter_id.clone(),
        version,
        display_name,
        risk_class,
        capabilities,
        enabled,
        active_key,
    })
}

impl AdapterRegistryStore for ClasperSqliteStore {
    fn upsert(&self, registration: AdapterRegistration) -> Result<(), AdapterRegistryError> {
        let risk_class = serde_json::to_string(&registration.risk_class).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let capabilities = serde_json::to_string(&registration.capabilities).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO adapter_registry
                    (tenant_id, adapter_id, version, display_name, risk_class, capabilities, enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (tenant_id, adapter_id) DO UPDATE SET
                    version = excluded.version,
                    display_name = excluded.display_name,
                    risk_class = excluded.risk_class,
                    capabilities = excluded.capabilities,
                    enabled = excluded.enabled",
                params![
                    registration.tenant_id.as_str(),
                    registration.adapter_id.as_str(),
                    registration.version,
                    registration.display_name,
                    risk_class,
                    capabilities,
                    registration.enabled,
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn get(&self, tenant_id: &TenantId, adapter_id: &AdapterId) -> Result<Option<AdapterRegistration>, AdapterRegistryError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT version, display_name, risk_class, capabilities, enabled FROM adapter_registry
                 WHERE tenant_id = ?1 AND adapter_id = ?2",
                params![tenant_id.as_str(), adapter_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some((version, display_name, risk_class, capabilities, enabled)) = row else {
            return Ok(None);
        };
        let active_key = load_active_key(&guard, tenant_id, adapter_id)?;
        Ok(Some(build_registration(tenant_id, adapter_id, version, display_name, risk_class, capabilities, enabled, active_key)?))
    }

    fn list(&self, tenant_id: &TenantId) -> Result<Vec<AdapterRegistration>, AdapterRegistryError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT adapter_id, version, display_name, risk_class, capabilities, enabled FROM adapter_registry WHERE tenant_id = ?1")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![tenant_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut registrations = Vec::new();
        for row in rows {
            let (adapter_id, version, display_name, risk_class, capabilities, enabled) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let adapter_id = AdapterId::new(adapter_id);
            let active_key = load_active_key(&guard, tenant_id, &adapter_id)?;
            registrations.push(build_registration(tenant_id, &adapter_id, version, display_name, risk_class, capabilities, enabled, active_key)?);
        }
        Ok(registrations)
    }

    fn disable(&self, tenant_id: &TenantId, adapter_id: &AdapterId) -> Result<(), AdapterRegistryError> {
        let guard = self.lock()?;
        let affected = guard
            .execute(
                "UPDATE adapter_registry SET enabled = 0 WHERE tenant_id = ?1 AND adapter_id = ?2",
                params![tenant_id.as_str(), adapter_id.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if affected == 0 {
            return Err(AdapterRegistryError::NotFound(adapter_id.clone()));
        }
        Ok(())
    }

    fn set_key(
        &self,
        tenant_id: &TenantId,
        adapter_id: &AdapterId,
        algorithm: SignatureAlgorithm,
        public_jwk: serde_json::Value,
    ) -> Result<TelemetryKey, AdapterRegistryError> {
        let guard = self.lock()?;
        let registered: bool = guard
            .query_row(
                "SELECT 1 FROM adapter_registry WHERE tenant_id = ?1 AND adapter_id = ?2",
                params![tenant_id.as_str(), adapter_id.as_str()],
                |_| Ok(true),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?
            .unwrap_or(false);
        if !registered {
            return Err(AdapterRegistryError::NotFound(adapter_id.clone()));
        }

        let created_at = Timestamp::now();
        let algorithm_json = serde_json::to_string(&algorithm).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let public_jwk_json = serde_json::to_string(&public_jwk).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let created_at_sql = timestamp_to_sql(created_at)?;
        guard
            .execute(
                "INSERT INTO adapter_telemetry_keys (tenant_id, adapter_id, algorithm, public_jwk, key_id, created_at, revoked_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, NULL)",
                params![tenant_id.as_str(), adapter_id.as_str(), algorithm_json, public_jwk_json, created_at_sql],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        Ok(TelemetryKey { algorithm, public_jwk, key_id: None, created_at, revoked_at: None })
    }

    fn revoke_key(&self, tenant_id: &TenantId, adapter_id: &AdapterId) -> Result<(), AdapterRegistryError> {
        let revoked_at = timestamp_to_sql(Timestamp::now())?;
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE adapter_telemetry_keys SET revoked_at = ?1
                 WHERE tenant_id = ?2 AND adapter_id = ?3 AND revoked_at IS NULL",
                params![revoked_at, tenant_id.as_str(), adapter_id.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Tool Token Store
// ============================================================================

impl ToolTokenStore for ClasperSqliteStore {
    fn insert(&self, row: ToolTokenRow) -> Result<(), ToolTokenStoreError> {
        let issued_at = timestamp_to_sql(row.issued_at)?;
        let expires_at = timestamp_to_sql(row.expires_at)?;
        let used_at = optional_timestamp_to_sql(row.used_at)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO tool_tokens (jti, tenant_id, adapter_id, execution_id, tool, scope_hash, issued_at, expires_at, used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.jti.as_str(),
                    row.tenant_id.as_str(),
                    row.adapter_id.as_str(),
                    row.execution_id.as_str(),
                    row.tool,
                    row.scope_hash,
                    issued_at,
                    expires_at,
                    used_at,
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn lookup(&self, jti: &TokenId) -> Result<Option<ToolTokenClaims>, ToolTokenStoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT tenant_id, adapter_id, execution_id, tool, scope_hash, expires_at FROM tool_tokens WHERE jti = ?1",
                params![jti.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some((tenant_id, adapter_id, execution_id, tool, scope_hash, expires_at)) = row else {
            return Ok(None);
        };
        Ok(Some(ToolTokenClaims {
            jti: jti.clone(),
            tenant_id: TenantId::new(tenant_id),
            adapter_id: AdapterId::new(adapter_id),
            execution_id: ExecutionId::new(execution_id),
            tool,
            scope_hash,
            expires_at: timestamp_from_sql(&expires_at)?,
        }))
    }

    fn consume(&self, jti: &TokenId, used_at: Timestamp) -> Result<bool, ToolTokenStoreError> {
        let used_at_sql = timestamp_to_sql(used_at)?;
        let guard = self.lock()?;
        let affected = guard
            .execute(
                "UPDATE tool_tokens SET used_at = ?1 WHERE jti = ?2 AND used_at IS NULL",
                params![used_at_sql, jti.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if affected == 1 {
            return Ok(true);
        }
        let exists: bool = guard
            .query_row("SELECT 1 FROM tool_tokens WHERE jti = ?1", params![jti.as_str()], |_| Ok(true))
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?
            .unwrap_or(false);
        if exists {
            Ok(false)
        } else {
            Err(ToolTokenStoreError::NotFound(jti.clone()))
        }
    }
}

// ============================================================================
// SECTION: Approval Queue Store
// ============================================================================

/// Reads one `decisions` row and parses it into a [`Decision`].
fn read_decision_row(connection: &Connection, decision_id: &DecisionId) -> Result<Option<Decision>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT tenant_id, execution_id, adapter_id, state, request_snapshot, required_role,
                    created_at, expires_at, resolved_at, resolved_by, reason_code, justification
             FROM decisions WHERE decision_id = ?1",
            params![decision_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                ))
            },
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let Some((
        tenant_id,
        execution_id,
        adapter_id,
        state,
        request_snapshot,
        required_role,
        created_at,
        expires_at,
        resolved_at,
        resolved_by,
        reason_code,
        justification,
    )) = row
    else {
        return Ok(None);
    };
    Ok(Some(Decision {
        decision_id: decision_id.clone(),
        tenant_id: TenantId::new(tenant_id),
        execution_id: ExecutionId::new(execution_id),
        adapter_id: AdapterId::new(adapter_id),
        state: serde_json::from_str(&state).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
        request_snapshot: serde_json::from_str(&request_snapshot).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
        required_role,
        created_at: timestamp_from_sql(&created_at)?,
        expires_at: timestamp_from_sql(&expires_at)?,
        resolved_at: optional_timestamp_from_sql(resolved_at)?,
        resolved_by,
        reason_code: reason_code.map(|value| serde_json::from_str(&value)).transpose().map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
        justification,
    }))
}

impl ApprovalQueueStore for ClasperSqliteStore {
    fn create(&self, decision: Decision) -> Result<(), ApprovalQueueError> {
        let state = serde_json::to_string(&decision.state).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let request_snapshot = serde_json::to_string(&decision.request_snapshot).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let created_at = timestamp_to_sql(decision.created_at)?;
        let expires_at = timestamp_to_sql(decision.expires_at)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO decisions
                    (decision_id, tenant_id, execution_id, adapter_id, state, request_snapshot, required_role, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    decision.decision_id.as_str(),
                    decision.tenant_id.as_str(),
                    decision.execution_id.as_str(),
                    decision.adapter_id.as_str(),
                    state,
                    request_snapshot,
                    decision.required_role,
                    created_at,
                    expires_at,
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn get(&self, decision_id: &DecisionId) -> Result<Option<Decision>, ApprovalQueueError> {
        let guard = self.lock()?;
        Ok(read_decision_row(&guard, decision_id)?)
    }

    #[allow(clippy::too_many_arguments, reason = "mirrors the ApprovalQueueStore trait signature")]
    fn resolve(
        &self,
        decision_id: &DecisionId,
        approved: bool,
        resolved_by: &str,
        reason_code: ReasonCode,
        justification: &str,
        resolved_at: Timestamp,
    ) -> Result<Decision, ApprovalQueueError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let current = read_decision_row(&tx, decision_id)?.ok_or_else(|| ApprovalQueueError::NotFound(decision_id.clone()))?;
        if current.state != DecisionState::Pending {
            return Err(ApprovalQueueError::AlreadyResolved(decision_id.clone()));
        }
        let new_state = if approved { DecisionState::Approved } else { DecisionState::Denied };
        let new_state_json = serde_json::to_string(&new_state).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let reason_code_json = serde_json::to_string(&reason_code).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let resolved_at_sql = timestamp_to_sql(resolved_at)?;
        tx.execute(
            "UPDATE decisions SET state = ?1, resolved_at = ?2, resolved_by = ?3, reason_code = ?4, justification = ?5
             WHERE decision_id = ?6",
            params![new_state_json, resolved_at_sql, resolved_by, reason_code_json, justification, decision_id.as_str()],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        Ok(Decision {
            state: new_state,
            resolved_at: Some(resolved_at),
            resolved_by: Some(resolved_by.to_string()),
            reason_code: Some(reason_code),
            justification: Some(justification.to_string()),
            ..current
        })
    }

    fn consume(&self, decision_id: &DecisionId) -> Result<Decision, ApprovalQueueError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let current = read_decision_row(&tx, decision_id)?.ok_or_else(|| ApprovalQueueError::NotFound(decision_id.clone()))?;
        if current.state == DecisionState::Expired {
            return Err(ApprovalQueueError::Expired(decision_id.clone()));
        }
        if current.state != DecisionState::Approved {
            return Err(ApprovalQueueError::AlreadyResolved(decision_id.clone()));
        }
        let new_state_json = serde_json::to_string(&DecisionState::Consumed).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        tx.execute("UPDATE decisions SET state = ?1 WHERE decision_id = ?2", params![new_state_json, decision_id.as_str()])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        Ok(Decision { state: DecisionState::Consumed, ..current })
    }

    fn sweep_expired(&self, tenant_id: &TenantId, now: Timestamp) -> Result<Vec<DecisionId>, ApprovalQueueError> {
        let now_sql = timestamp_to_sql(now)?;
        let pending_json = serde_json::to_string(&DecisionState::Pending).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let expired_json = serde_json::to_string(&DecisionState::Expired).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let overdue: Vec<String> = {
            let mut statement = tx
                .prepare("SELECT decision_id FROM decisions WHERE tenant_id = ?1 AND state = ?2 AND expires_at < ?3")
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = statement
                .query_map(params![tenant_id.as_str(), pending_json, now_sql], |row| row.get::<_, String>(0))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|err| SqliteStoreError::Db(err.to_string()))?);
            }
            ids
        };
        for decision_id in &overdue {
            tx.execute(
                "UPDATE decisions SET state = ?1 WHERE decision_id = ?2",
                params![expired_json, decision_id],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(overdue.into_iter().map(DecisionId::new).collect())
    }
}

// ============================================================================
// SECTION: Audit Log Store
// ============================================================================

impl AuditLogStore for ClasperSqliteStore {
    fn append(
        &self,
        tenant_id: &TenantId,
        event_type: &str,
        occurred_at: Timestamp,
        actor: &str,
        target_id: Option<String>,
        event_data: serde_json::Value,
    ) -> Result<AuditEntry, AuditLogError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let tail: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, entry_hash FROM audit_chain WHERE tenant_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![tenant_id.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let (prev_seq, prev_hash) = tail.unwrap_or((0, GENESIS_HASH.to_string()));
        let seq = u64::try_from(prev_seq).unwrap_or(0) + 1;

        let entry = AuditEntry::build(tenant_id.clone(), seq, event_type, occurred_at, actor, target_id, event_data, prev_hash)
            .map_err(|err| AuditLogError::Io(err.to_string()))?;

        let occurred_at_sql = timestamp_to_sql(entry.occurred_at)?;
        let event_data_json = serde_json::to_string(&entry.event_data).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        tx.execute(
            "INSERT INTO audit_chain (tenant_id, seq, event_type, occurred_at, actor, target_id, event_data, prev_hash, entry_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.tenant_id.as_str(),
                i64::try_from(entry.seq).unwrap_or(i64::MAX),
                entry.event_type,
                occurred_at_sql,
                entry.actor,
                entry.target_id,
                event_data_json,
                entry.prev_hash,
                entry.entry_hash,
            ],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        Ok(entry)
    }

    fn export(&self, tenant_id: &TenantId) -> Result<Vec<AuditEntry>, AuditLogError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT seq, event_type, occurred_at, actor, target_id, event_data, prev_hash, entry_hash
                 FROM audit_chain WHERE tenant_id = ?1 ORDER BY seq ASC",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![tenant_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut entries = Vec::new();
        for row in rows {
            let (seq, event_type, occurred_at, actor, target_id, event_data, prev_hash, entry_hash) =
                row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            entries.push(AuditEntry {
                tenant_id: tenant_id.clone(),
                seq: u64::try_from(seq).unwrap_or(0),
                event_type,
                occurred_at: timestamp_from_sql(&occurred_at)?,
                actor,
                target_id,
                event_data: serde_json::from_str(&event_data).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
                prev_hash,
                entry_hash,
            });
        }
        Ok(entries)
    }
}

// ============================================================================
// SECTION: Trace Store
// ============================================================================

impl TraceStore for ClasperSqliteStore {
    fn append_step(&self, execution_id: &ExecutionId, detail: TraceStepKind, occurred_at: Timestamp) -> Result<TraceStep, TraceStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let tail: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, step_hash FROM trace_steps WHERE execution_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![execution_id.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let (prev_seq, prev_hash) = tail.unwrap_or((0, GENESIS_HASH.to_string()));
        let seq = u64::try_from(prev_seq).unwrap_or(0) + 1;
        let step_id = StepId::new(uuid::Uuid::now_v7().to_string());

        let step = TraceStep::build(step_id, execution_id.clone(), seq, detail, occurred_at, prev_hash)
            .map_err(|err| TraceStoreError::Io(err.to_string()))?;

        let occurred_at_sql = timestamp_to_sql(step.occurred_at)?;
        let detail_json = serde_json::to_string(&step.detail).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        tx.execute(
            "INSERT INTO trace_steps (execution_id, seq, step_id, detail, occurred_at, prev_step_hash, step_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                step.execution_id.as_str(),
                i64::try_from(step.seq).unwrap_or(i64::MAX),
                step.step_id.as_str(),
                detail_json,
                occurred_at_sql,
                step.prev_step_hash,
                step.step_hash,
            ],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        Ok(step)
    }

    fn steps_for_execution(&self, execution_id: &ExecutionId) -> Result<Vec<TraceStep>, TraceStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT step_id, seq, detail, occurred_at, prev_step_hash, step_hash
                 FROM trace_steps WHERE execution_id = ?1 ORDER BY seq ASC",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![execution_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut steps = Vec::new();
        for row in rows {
            let (step_id, seq, detail, occurred_at, prev_step_hash, step_hash) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            steps.push(TraceStep {
                step_id: StepId::new(step_id),
                execution_id: execution_id.clone(),
                seq: u64::try_from(seq).unwrap_or(0),
                detail: serde_json::from_str(&detail).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
                occurred_at: timestamp_from_sql(&occurred_at)?,
                prev_step_hash,
                step_hash,
            });
        }
        Ok(steps)
    }
}

// ============================================================================
// SECTION: Tenant Budget Store
// ============================================================================

impl TenantBudgetStore for ClasperSqliteStore {
    fn remaining_budget(&self, tenant_id: &TenantId) -> Result<Option<f64>, TenantBudgetError> {
        let guard = self.lock()?;
        let remaining = guard
            .query_row(
                "SELECT remaining_budget FROM tenant_budgets WHERE tenant_id = ?1",
                params![tenant_id.as_str()],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?
            .flatten();
        Ok(remaining)
    }
}

// ============================================================================
// SECTION: Telemetry Sinks
// ============================================================================

impl TelemetrySinks for ClasperSqliteStore {
    fn record_cost(&self, tenant_id: &TenantId, adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError> {
        insert_telemetry_report(&self.lock()?, "telemetry_cost_reports", tenant_id, adapter_id, payload)
    }

    fn record_metrics(&self, tenant_id: &TenantId, adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError> {
        insert_telemetry_report(&self.lock()?, "telemetry_metrics_reports", tenant_id, adapter_id, payload)
    }

    fn record_violation(&self, tenant_id: &TenantId, adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError> {
        insert_telemetry_report(&self.lock()?, "telemetry_violations", tenant_id, adapter_id, payload)
    }

    fn mark_ingested(&self, dedup_key: &str) -> Result<bool, TelemetrySinkError> {
        let guard = self.lock()?;
        let affected = guard
            .execute("INSERT OR IGNORE INTO telemetry_ingest_ledger (dedup_key) VALUES (?1)", params![dedup_key])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(affected == 1)
    }
}

/// Inserts one row into a fixed-shape telemetry report table. `table` is
/// always one of this module's own constant table names, never caller input.
fn insert_telemetry_report(
    connection: &Connection,
    table: &str,
    tenant_id: &TenantId,
    adapter_id: &AdapterId,
    payload: &serde_json::Value,
) -> Result<(), TelemetrySinkError> {
    let payload_json = serde_json::to_string(payload).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    connection
        .execute(
            &format!("INSERT INTO {table} (tenant_id, adapter_id, payload) VALUES (?1, ?2, ?3)"),
            params![tenant_id.as_str(), adapter_id.as_str(), payload_json],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test-only assertions are permitted"
)]
mod tests {
    use clasper_core::AdapterRegistration;
    use clasper_core::Decision;
    use clasper_core::DecisionState;
    use clasper_core::Effect;
    use clasper_core::ExecutionDecision;
    use clasper_core::ExecutionRequest;
    use clasper_core::Policy;
    use clasper_core::PolicyConditions;
    use clasper_core::PolicyScope;
    use clasper_core::PolicySubject;
    use clasper_core::RiskBucket;
    use clasper_core::RiskScore;
    use clasper_core::SubjectType;
    use clasper_core::core::risk::RiskBreakdown;
    use clasper_core::WorkspaceId;

    use super::*;

    fn store() -> ClasperSqliteStore {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clasper.sqlite3");
        let config = SqliteStoreConfig { path, busy_timeout_ms: 5_000, journal_mode: SqliteStoreMode::Wal, sync_mode: SqliteSyncMode::Full };
        let store = ClasperSqliteStore::new(config).expect("open store");
        std::mem::forget(dir);
        store
    }

    fn policy(tenant_id: &str, enabled: bool) -> Policy {
        Policy {
            policy_id: PolicyId::new("p1"),
            scope: PolicyScope { tenant_id: TenantId::new(tenant_id), workspace_id: None, environment: None },
            subject: PolicySubject { subject_type: SubjectType::Adapter, name: None },
            conditions: PolicyConditions::default(),
            effect: Effect::Deny,
            required_role: None,
            enabled,
        }
    }

    #[test]
    fn policy_upsert_then_load_round_trips_and_filters_disabled() {
        let store = store();
        store.upsert(policy("t1", true)).expect("upsert enabled");
        let mut disabled = policy("t1", false);
        disabled.policy_id = PolicyId::new("p2");
        store.upsert(disabled).expect("upsert disabled");

        let loaded = store.load(&TenantId::new("t1")).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].policy_id, PolicyId::new("p1"));
    }

    #[test]
    fn adapter_set_key_then_get_returns_the_active_key() {
        let store = store();
        let registration = AdapterRegistration {
            tenant_id: TenantId::new("t1"),
            adapter_id: AdapterId::new("a1"),
            version: "1.0.0".to_string(),
            display_name: "Adapter One".to_string(),
            risk_class: RiskClass::Low,
            capabilities: vec!["llm".to_string()],
            enabled: true,
            active_key: None,
        };
        store.upsert(registration).expect("register adapter");

        let key = store
            .set_key(&TenantId::new("t1"), &AdapterId::new("a1"), SignatureAlgorithm::Ed25519, serde_json::json!({"kty": "OKP"}))
            .expect("set key");
        let fetched = store.get(&TenantId::new("t1"), &AdapterId::new("a1")).expect("get").expect("present");
        assert_eq!(fetched.active_key.expect("active key").created_at, key.created_at);

        store.revoke_key(&TenantId::new("t1"), &AdapterId::new("a1")).expect("revoke");
        let after_revoke = store.get(&TenantId::new("t1"), &AdapterId::new("a1")).expect("get").expect("present");
        assert!(after_revoke.active_key.is_none());
    }

    #[test]
    fn adapter_set_key_does_not_require_revoking_the_prior_key_first() {
        let store = store();
        let registration = AdapterRegistration {
            tenant_id: TenantId::new("t1"),
            adapter_id: AdapterId::new("a1"),
            version: "1.0.0".to_string(),
            display_name: "Adapter One".to_string(),
            risk_class: RiskClass::Low,
            capabilities: vec![],
            enabled: true,
            active_key: None,
        };
        store.upsert(registration).expect("register adapter");
        store.set_key(&TenantId::new("t1"), &AdapterId::new("a1"), SignatureAlgorithm::Ed25519, serde_json::json!({})).expect("first key");
        let second = store.set_key(&TenantId::new("t1"), &AdapterId::new("a1"), SignatureAlgorithm::Es256, serde_json::json!({})).expect("second key");
        let fetched = store.get(&TenantId::new("t1"), &AdapterId::new("a1")).expect("get").expect("present");
        assert_eq!(fetched.active_key.expect("active key").created_at, second.created_at);
    }

    fn token_row(jti: &str) -> ToolTokenRow {
        let now = Timestamp::now();
        ToolTokenRow {
            jti: TokenId::new(jti),
            tenant_id: TenantId::new("t1"),
            adapter_id: AdapterId::new("a1"),
            execution_id: ExecutionId::new("e1"),
            tool: "shell.exec".to_string(),
            scope_hash: "sha256:deadbeef".to_string(),
            issued_at: now,
            expires_at: now.checked_add_seconds(60).expect("add seconds"),
            used_at: None,
        }
    }

    #[test]
    fn tool_token_consume_is_a_single_use_compare_and_swap() {
        let store = store();
        let row = token_row("tok-1");
        store.insert(row.clone()).expect("insert");

        let first = store.consume(&row.jti, Timestamp::now()).expect("first consume");
        let second = store.consume(&row.jti, Timestamp::now()).expect("second consume");
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn tool_token_consume_of_an_unknown_jti_is_not_found() {
        let store = store();
        let err = store.consume(&TokenId::new("missing"), Timestamp::now()).unwrap_err();
        assert!(matches!(err, ToolTokenStoreError::NotFound(_)));
    }

    fn decision(decision_id: &str) -> Decision {
        let now = Timestamp::now();
        Decision {
            decision_id: DecisionId::new(decision_id),
            tenant_id: TenantId::new("t1"),
            execution_id: ExecutionId::new("e1"),
            adapter_id: AdapterId::new("a1"),
            state: DecisionState::Pending,
            request_snapshot: clasper_core::DecisionSnapshot {
                request: ExecutionRequest {
                    execution_id: ExecutionId::new("e1"),
                    adapter_id: AdapterId::new("a1"),
                    tenant_id: TenantId::new("t1"),
                    workspace_id: WorkspaceId::new("w1"),
                    skill_id: None,
                    requested_capabilities: vec!["shell.exec".to_string()],
                    intent: None,
                    context: None,
                    provenance: None,
                    estimated_cost: None,
                    tool_count: None,
                    environment: None,
                },
                risk: RiskScore { score: 10, bucket: RiskBucket::Low, breakdown: RiskBreakdown::default() },
                matched_policies: Vec::new(),
                decision: ExecutionDecision::PendingApproval { decision_id: DecisionId::new(decision_id), decision_token: "tok".to_string() },
            },
            required_role: Some("approver".to_string()),
            created_at: now,
            expires_at: now.checked_add_seconds(86_400).expect("add seconds"),
            resolved_at: None,
            resolved_by: None,
            reason_code: None,
            justification: None,
        }
    }

    #[test]
    fn decision_resolve_then_consume_follows_the_terminal_state_machine() {
        let store = store();
        store.create(decision("d1")).expect("create");

        let resolved = store
            .resolve(&DecisionId::new("d1"), true, "alice", ReasonCode::OpsOverride, "approved for incident response", Timestamp::now())
            .expect("resolve");
        assert_eq!(resolved.state, DecisionState::Approved);

        let consumed = store.consume(&DecisionId::new("d1")).expect("consume");
        assert_eq!(consumed.state, DecisionState::Consumed);

        let err = store.consume(&DecisionId::new("d1")).unwrap_err();
        assert!(matches!(err, ApprovalQueueError::AlreadyResolved(_)));
    }

    #[test]
    fn consume_of_an_expired_decision_reports_expired_not_already_resolved() {
        let store = store();
        let mut overdue = decision("d-overdue");
        overdue.expires_at = Timestamp::now();
        store.create(overdue).expect("create overdue");

        let later = Timestamp::now().checked_add_seconds(5).expect("add seconds");
        store.sweep_expired(&TenantId::new("t1"), later).expect("sweep");

        let err = store.consume(&DecisionId::new("d-overdue")).unwrap_err();
        assert!(matches!(err, ApprovalQueueError::Expired(_)));
    }

    #[test]
    fn sweep_expired_transitions_only_overdue_pending_decisions() {
        let store = store();
        let mut overdue = decision("d-overdue");
        overdue.expires_at = Timestamp::now();
        store.create(overdue).expect("create overdue");
        store.create(decision("d-fresh")).expect("create fresh");

        let later = Timestamp::now().checked_add_seconds(5).expect("add seconds");
        let swept = store.sweep_expired(&TenantId::new("t1"), later).expect("sweep");
        assert_eq!(swept, vec![DecisionId::new("d-overdue")]);

        let fresh = store.get(&DecisionId::new("d-fresh")).expect("get").expect("present");
        assert_eq!(fresh.state, DecisionState::Pending);
    }

    #[test]
    fn audit_append_chains_entries_and_export_preserves_order() {
        let store = store();
        let tenant_id = TenantId::new("t1");
        let e1 = store.append(&tenant_id, "execution_decision", Timestamp::now(), "adapter:a1", None, serde_json::json!({"n": 1})).expect("append 1");
        let e2 = store.append(&tenant_id, "execution_decision", Timestamp::now(), "adapter:a1", None, serde_json::json!({"n": 2})).expect("append 2");
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
        assert_eq!(e2.prev_hash, e1.entry_hash);

        let exported = store.export(&tenant_id).expect("export");
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].seq, 1);
        assert_eq!(exported[1].seq, 2);

        let breaks = clasper_core::verify_chain(&exported).expect("verify chain");
        assert!(breaks.is_empty());
    }

    #[test]
    fn audit_chains_are_isolated_per_tenant() {
        let store = store();
        store.append(&TenantId::new("t1"), "e", Timestamp::now(), "a", None, serde_json::json!({})).expect("t1 append");
        let e = store.append(&TenantId::new("t2"), "e", Timestamp::now(), "a", None, serde_json::json!({})).expect("t2 append");
        assert_eq!(e.seq, 1);
        assert_eq!(e.prev_hash, GENESIS_HASH);
    }

    #[test]
    fn trace_append_step_chains_within_an_execution() {
        let store = store();
        let execution_id = ExecutionId::new("e1");
        let s1 = store
            .append_step(&execution_id, TraceStepKind::Decision { outcome: "granted".to_string() }, Timestamp::now())
            .expect("append s1");
        let s2 = store
            .append_step(&execution_id, TraceStepKind::Completed { status: "ok".to_string() }, Timestamp::now())
            .expect("append s2");
        assert_eq!(s2.prev_step_hash, s1.step_hash);

        let steps = store.steps_for_execution(&execution_id).expect("steps");
        let breaks = clasper_core::verify_trace(&steps).expect("verify trace");
        assert!(breaks.is_empty());
    }

    #[test]
    fn telemetry_sinks_mark_ingested_is_idempotent() {
        let store = store();
        let first = store.mark_ingested("e1:cost:sha256:abc").expect("first");
        let second = store.mark_ingested("e1:cost:sha256:abc").expect("second");
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn tenant_budget_remaining_defaults_to_untracked() {
        let store = store();
        let remaining = store.remaining_budget(&TenantId::new("unknown")).expect("remaining");
        assert!(remaining.is_none());
    }
}
