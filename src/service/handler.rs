//! Request execution with optional hooks and a default TTL.

use crate::protocol::{Reply, Request};
use crate::storage::{MemoryTable, Storage};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Error returned by a hook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Runs before every storage request. An error rejects the request.
pub type PreHook = Arc<dyn Fn(&Request) -> Result<(), HookError> + Send + Sync>;

/// Runs after every successful storage request with the reply about to be
/// sent. Errors are logged and otherwise ignored.
pub type PostHook = Arc<dyn Fn(&Request, &Reply) -> Result<(), HookError> + Send + Sync>;

/// Executes requests against a storage backend.
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Clone)]
pub struct Service {
    storage: Arc<dyn Storage>,
    pre_hook: Option<PreHook>,
    post_hook: Option<PostHook>,
    default_ttl: Option<Duration>,
}

impl Service {
    /// Creates a service over `storage` with no hooks and no default TTL.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::builder().storage(storage).build()
    }

    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    /// Returns the storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Executes a request and returns the reply to send.
    pub fn execute(&self, request: Request) -> Reply {
        if matches!(request, Request::Ping) {
            return Reply::Pong;
        }

        if let Some(hook) = &self.pre_hook {
            if let Err(e) = hook(&request) {
                debug!(command = request.name(), error = %e, "Request rejected by pre-hook");
                return Reply::error(format!("ERR {}", e));
            }
        }

        let reply = self.dispatch(&request);

        if let Some(hook) = &self.post_hook {
            if !reply.is_error() {
                if let Err(e) = hook(&request, &reply) {
                    warn!(command = request.name(), error = %e, "Post-hook failed");
                }
            }
        }

        reply
    }

    fn dispatch(&self, request: &Request) -> Reply {
        let result = match request {
            Request::Ping => Ok(Reply::Pong),
            Request::Get { key } => Ok(match self.storage.get(key) {
                Some(value) => Reply::Bulk(value),
                None => Reply::Nil,
            }),
            Request::Set { key, value, ttl } => {
                let written = match ttl.or(self.default_ttl) {
                    Some(ttl) => self.storage.set_with_ttl(key, value, ttl),
                    None => self.storage.set(key, value),
                };
                written.map(|()| Reply::Ok)
            }
            Request::Del { keys } => return self.delete_all(keys),
        };

        result.unwrap_or_else(|e| Reply::error(format!("ERR {}", e)))
    }
}

impl Service {
    /// Deletes keys in order and stops at the first failure. Keys before the
    /// failing one stay deleted, so the error reports how many went.
    fn delete_all(&self, keys: &[String]) -> Reply {
        let mut removed = 0i64;
        for key in keys {
            match self.storage.delete(key) {
                Ok(found) => removed += i64::from(found),
                Err(e) => {
                    warn!(key = %key, removed, error = %e, "DEL failed part way");
                    return Reply::error(format!(
                        "ERR {} ({} of {} keys deleted before '{}')",
                        e,
                        removed,
                        keys.len(),
                        key
                    ));
                }
            }
        }
        Reply::Integer(removed)
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("pre_hook", &self.pre_hook.is_some())
            .field("post_hook", &self.post_hook.is_some())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Service`].
///
/// # Example
///
/// ```
/// use emberkv::protocol::{Reply, Request};
/// use emberkv::service::{HookError, Service};
/// use std::time::Duration;
///
/// let service = Service::builder()
///     .default_ttl(Duration::from_secs(300))
///     .pre_hook(|req: &Request| match req {
///         Request::Del { .. } => Err(HookError::new("deletes are disabled")),
///         _ => Ok(()),
///     })
///     .build();
///
/// let reply = service.execute(Request::Del { keys: vec!["k".to_string()] });
/// assert_eq!(reply, Reply::error("ERR deletes are disabled"));
/// ```
#[derive(Default)]
pub struct ServiceBuilder {
    storage: Option<Arc<dyn Storage>>,
    pre_hook: Option<PreHook>,
    post_hook: Option<PostHook>,
    default_ttl: Option<Duration>,
}

impl ServiceBuilder {
    /// Uses `storage` instead of a fresh in-memory table.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn pre_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.pre_hook = Some(Arc::new(hook));
        self
    }

    pub fn post_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Reply) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.post_hook = Some(Arc::new(hook));
        self
    }

    /// TTL applied to `SET` requests that carry none. Zero disables it.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    pub fn build(self) -> Service {
        Service {
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryTable::new())),
            pre_hook: self.pre_hook,
            post_hook: self.post_hook,
            default_ttl: self.default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Engine, EngineConfig};
    use std::sync::Mutex;
    use std::thread;

    fn set(key: &str, value: &str) -> Request {
        Request::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl: None,
        }
    }

    fn get(key: &str) -> Request {
        Request::Get {
            key: key.to_string(),
        }
    }

    fn del(keys: &[&str]) -> Request {
        Request::Del {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Memory storage whose deletes of one key always fail.
    struct FailingDelete {
        table: MemoryTable,
        broken: &'static str,
    }

    impl Storage for FailingDelete {
        fn set(&self, key: &str, value: &str) -> crate::storage::Result<()> {
            Storage::set(&self.table, key, value)
        }

        fn set_with_ttl(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> crate::storage::Result<()> {
            Storage::set_with_ttl(&self.table, key, value, ttl)
        }

        fn get(&self, key: &str) -> Option<String> {
            self.table.get(key)
        }

        fn delete(&self, key: &str) -> crate::storage::Result<bool> {
            if key == self.broken {
                return Err(crate::storage::StorageError::io(
                    "/tmp/ember.log",
                    std::io::Error::other("disk full"),
                ));
            }
            Storage::delete(&self.table, key)
        }
    }

    #[test]
    fn test_ping() {
        assert_eq!(Service::default().execute(Request::Ping), Reply::Pong);
    }

    #[test]
    fn test_set_get() {
        let service = Service::default();

        assert_eq!(service.execute(set("name", "ember")), Reply::Ok);
        assert_eq!(
            service.execute(get("name")),
            Reply::Bulk("ember".to_string())
        );
    }

    #[test]
    fn test_get_nonexistent() {
        assert_eq!(Service::default().execute(get("missing")), Reply::Nil);
    }

    #[test]
    fn test_del_counts_removed_keys() {
        let service = Service::default();
        service.execute(set("a", "1"));
        service.execute(set("b", "2"));

        assert_eq!(service.execute(del(&["a", "b", "c"])), Reply::Integer(2));
        assert_eq!(service.execute(del(&["a"])), Reply::Integer(0));
        assert_eq!(service.execute(get("a")), Reply::Nil);
    }

    #[test]
    fn test_del_failure_reports_partial_count() {
        let storage = Arc::new(FailingDelete {
            table: MemoryTable::new(),
            broken: "locked",
        });
        let service = Service::new(storage.clone());
        service.execute(set("a", "1"));
        service.execute(set("locked", "2"));
        service.execute(set("b", "3"));

        let reply = service.execute(del(&["a", "ghost", "locked", "b"]));
        assert_eq!(
            reply,
            Reply::error(
                "ERR I/O error on /tmp/ember.log: disk full (1 of 4 keys deleted before 'locked')"
            )
        );

        // Keys before the failure are gone, the rest untouched
        assert_eq!(storage.table.get("a"), None);
        assert_eq!(storage.table.get("locked"), Some("2".to_string()));
        assert_eq!(storage.table.get("b"), Some("3".to_string()));
    }

    #[test]
    fn test_set_with_explicit_ttl() {
        let service = Service::default();
        service.execute(Request::Set {
            key: "s".to_string(),
            value: "v".to_string(),
            ttl: Some(Duration::from_millis(50)),
        });

        assert_eq!(service.execute(get("s")), Reply::Bulk("v".to_string()));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(service.execute(get("s")), Reply::Nil);
    }

    #[test]
    fn test_default_ttl_applies_without_explicit_ttl() {
        let service = Service::builder()
            .default_ttl(Duration::from_millis(50))
            .build();
        service.execute(set("k", "v"));
        service.execute(Request::Set {
            key: "long".to_string(),
            value: "v".to_string(),
            ttl: Some(Duration::from_secs(60)),
        });

        thread::sleep(Duration::from_millis(80));
        assert_eq!(service.execute(get("k")), Reply::Nil);
        assert_eq!(service.execute(get("long")), Reply::Bulk("v".to_string()));
    }

    #[test]
    fn test_zero_default_ttl_means_none() {
        let service = Service::builder().default_ttl(Duration::ZERO).build();
        service.execute(set("k", "v"));

        thread::sleep(Duration::from_millis(10));
        assert_eq!(service.execute(get("k")), Reply::Bulk("v".to_string()));
    }

    #[test]
    fn test_pre_hook_rejects_without_touching_storage() {
        let storage = Arc::new(MemoryTable::new());
        let service = Service::builder()
            .storage(storage.clone())
            .pre_hook(|req: &Request| match req {
                Request::Set { key, .. } if key.starts_with("admin:") => {
                    Err(HookError::new("permission denied"))
                }
                _ => Ok(()),
            })
            .build();

        let reply = service.execute(set("admin:root", "x"));
        assert_eq!(reply, Reply::error("ERR permission denied"));
        assert!(storage.is_empty());

        assert_eq!(service.execute(set("user:1", "x")), Reply::Ok);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_post_hook_sees_request_and_reply() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let service = Service::builder()
            .post_hook(move |req: &Request, reply: &Reply| {
                log.lock().unwrap().push(format!("{} {}", req.name(), reply));
                Ok(())
            })
            .build();

        service.execute(set("k", "v"));
        service.execute(get("k"));
        service.execute(del(&["k"]));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["SET OK", "GET \"v\"", "DEL (integer) 1"]
        );
    }

    #[test]
    fn test_post_hook_error_does_not_change_reply() {
        let service = Service::builder()
            .post_hook(|_: &Request, _: &Reply| Err(HookError::new("audit sink down")))
            .build();

        assert_eq!(service.execute(set("k", "v")), Reply::Ok);
        assert_eq!(service.execute(get("k")), Reply::Bulk("v".to_string()));
    }

    #[test]
    fn test_storage_error_becomes_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(
            EngineConfig::new(dir.path().join("ember.log")).without_background_compaction(),
        )
        .unwrap();
        let service = Service::new(Arc::new(engine));

        // Keys from the wire never hold whitespace, but hooks or embedders may
        // build requests directly.
        let reply = service.execute(set("bad key", "v"));
        assert!(reply.is_error());
        assert!(matches!(reply, Reply::Error(ref msg) if msg.starts_with("ERR invalid key")));
    }

    #[test]
    fn test_clones_share_storage() {
        let service = Service::default();
        let other = service.clone();

        service.execute(set("shared", "yes"));
        assert_eq!(other.execute(get("shared")), Reply::Bulk("yes".to_string()));
    }
}
