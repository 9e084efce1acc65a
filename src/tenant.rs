use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::directory::{Directory, StaticDirectory};
use crate::dispatch::{self, LogSink, NotificationSink, RetryPolicy};
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// notification dispatcher + compactor.
/// Tenant = database name from the pgwire connection (one school per database).
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    directory: Arc<dyn Directory>,
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            directory: Arc::new(StaticDirectory::new()),
            sink: Arc::new(LogSink),
            retry: RetryPolicy::default(),
        }
    }

    /// Route notifications of every tenant created afterwards through `sink`.
    pub fn with_notifications(
        mut self,
        directory: Arc<dyn Directory>,
        sink: Arc<dyn NotificationSink>,
        retry: RetryPolicy,
    ) -> Self {
        self.directory = directory;
        self.sink = sink;
        self.retry = retry;
        self
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two connections may race to create the same tenant; the entry lock
        // makes exactly one of them open the WAL.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let receiver = notify.subscribe();
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        tokio::spawn(dispatch::run_dispatcher(
            receiver,
            self.directory.clone(),
            self.sink.clone(),
            self.retry,
        ));
        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));

        entry.or_insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("tenant {tenant} loaded");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("leavedesk_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn admin() -> Actor {
        Actor::new("admin", Role::Admin)
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let eng_a = tm.get_or_create("school_a").unwrap();
        let eng_b = tm.get_or_create("school_b").unwrap();

        // Same room id in both schools
        let room = Ulid::new();
        eng_a.create_room(&admin(), room, "Lab".into()).await.unwrap();
        eng_b.create_room(&admin(), room, "Lab".into()).await.unwrap();

        eng_a
            .set_constraint(&admin(), ConstraintKey::Quota, 4)
            .await
            .unwrap();

        assert_eq!(eng_a.list_constraints().await, vec![(ConstraintKey::Quota, 4)]);
        assert!(eng_b.list_constraints().await.is_empty());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }

    #[tokio::test]
    async fn tenant_state_survives_reload() {
        let dir = test_data_dir("reload");
        {
            let tm = TenantManager::new(dir.clone(), 1000);
            let eng = tm.get_or_create("school").unwrap();
            eng.define_period(&admin(), 1, "First".into()).await.unwrap();
        }
        let tm = TenantManager::new(dir, 1000);
        let eng = tm.get_or_create("school").unwrap();
        assert_eq!(eng.list_periods().len(), 1);
    }
}
