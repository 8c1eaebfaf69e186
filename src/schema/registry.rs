use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::future::BoxFuture;
use futures_util::future::{self, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{parse_proto, SchemaTree};
use crate::error::SchemaError;

/// Where schema text comes from.
///
/// `fetch` receives the canonical path `<root>/<file name>` of one schema file. Any timeout or
/// cancellation policy belongs to the source; the registry never retries.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, path: &str) -> std::io::Result<String>;
}

/// Schema files held in memory, keyed by file name. The root part of a requested path is
/// ignored.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema files bundled with this crate: the envelope itself and the standard
    /// container types.
    pub fn builtin() -> Self {
        Self::new()
            .with_file("message.proto", include_str!("../../schemas/message.proto"))
            .with_file("buckets.proto", include_str!("../../schemas/buckets.proto"))
    }

    pub fn with_file(mut self, name: &str, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&mut self, name: &str, text: impl Into<String>) {
        self.files
            .insert(resolve_import(name).to_string(), text.into());
    }
}

#[async_trait]
impl SchemaSource for MemorySource {
    async fn fetch(&self, path: &str) -> std::io::Result<String> {
        self.files.get(resolve_import(path)).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no schema named {}", path),
            )
        })
    }
}

/// Schema files read from disk, with paths taken relative to `base`.
///
/// Reads block the calling thread, so this belongs on blocking executors such as `block_on`. On
/// an async runtime, implement [`SchemaSource`] over the runtime's non-blocking reads instead.
#[derive(Clone, Debug)]
pub struct FileSource {
    base: PathBuf,
}

impl FileSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl SchemaSource for FileSource {
    async fn fetch(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.base.join(path))
    }
}

/// Canonical file name for an import, however it was written: only the base name counts.
pub fn resolve_import(import: &str) -> &str {
    import
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(import)
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<SchemaTree>, SchemaError>>>;

enum Slot {
    Ready(Arc<SchemaTree>),
    Loading {
        load: SharedLoad,
        /// The import this load is currently awaiting, if any.
        waiting_on: Option<String>,
    },
}

struct Inner {
    source: Arc<dyn SchemaSource>,
    root: String,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Loads schema files and caches one parsed tree per file name for the life of the registry.
///
/// Concurrent loads of the same file share a single fetch and parse. Failed loads are not
/// cached, so a later call fetches again. Cloning is cheap and clones share the cache.
#[derive(Clone)]
pub struct SchemaRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("root", &self.inner.root)
            .field("cached", &self.inner.slots.lock().len())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new(source: Arc<dyn SchemaSource>, root: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                root: root.into(),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &str {
        &self.inner.root
    }

    /// The path a schema file is fetched from.
    pub fn path_for(&self, file_name: &str) -> String {
        let root = self.inner.root.trim_end_matches('/');
        if root.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", root, file_name)
        }
    }

    /// The tree for a file, if it has already loaded.
    pub fn cached(&self, file_name: &str) -> Option<Arc<SchemaTree>> {
        match self.inner.slots.lock().get(resolve_import(file_name)) {
            Some(Slot::Ready(tree)) => Some(tree.clone()),
            _ => None,
        }
    }

    /// Load a schema file and, recursively, everything it imports.
    pub async fn load(&self, file_name: &str) -> Result<Arc<SchemaTree>, SchemaError> {
        self.load_chained(resolve_import(file_name).to_string(), Vec::new())
            .await
    }

    /// `chain` holds the files whose imports led here, outermost first.
    fn load_chained(
        &self,
        name: String,
        chain: Vec<String>,
    ) -> BoxFuture<'static, Result<Arc<SchemaTree>, SchemaError>> {
        let mut slots = self.inner.slots.lock();
        let shared = match slots.get(&name) {
            Some(Slot::Ready(tree)) => {
                debug!(file = %name, "schema cache hit");
                return future::ready(Ok(tree.clone())).boxed();
            }
            Some(Slot::Loading { load, .. }) => {
                debug!(file = %name, "joining in-flight schema load");
                load.clone()
            }
            None => {
                let load = self.clone().fetch_and_parse(name.clone(), chain).boxed().shared();
                slots.insert(
                    name,
                    Slot::Loading {
                        load: load.clone(),
                        waiting_on: None,
                    },
                );
                load
            }
        };
        shared.boxed()
    }

    /// Runs once per in-flight load, and settles the slot it was stored in.
    async fn fetch_and_parse(
        self,
        name: String,
        chain: Vec<String>,
    ) -> Result<Arc<SchemaTree>, SchemaError> {
        let result = self.build_tree(&name, chain).await;
        let mut slots = self.inner.slots.lock();
        match &result {
            Ok(tree) => {
                slots.insert(name, Slot::Ready(tree.clone()));
            }
            Err(err) => {
                warn!(file = %name, error = %err, "schema load failed");
                slots.remove(&name);
            }
        }
        result
    }

    async fn build_tree(
        &self,
        name: &str,
        mut chain: Vec<String>,
    ) -> Result<Arc<SchemaTree>, SchemaError> {
        let path = self.path_for(name);
        debug!(file = %name, %path, "fetching schema");
        let text = match AssertUnwindSafe(self.inner.source.fetch(&path))
            .catch_unwind()
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                return Err(SchemaError::SourceUnavailable {
                    file: name.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SchemaError::SourceUnavailable {
                    file: name.to_string(),
                    reason: "schema source panicked".to_string(),
                })
            }
        };
        let file = parse_proto(&text).map_err(|reason| SchemaError::ParseError {
            file: name.to_string(),
            reason,
        })?;

        chain.push(name.to_string());
        let mut imports = Vec::with_capacity(file.imports.len());
        for import in file.imports.iter() {
            let target = resolve_import(import).to_string();
            self.begin_wait(name, &target, &chain)?;
            let tree = self.load_chained(target, chain.clone()).await?;
            self.end_wait(name);
            imports.push(tree);
        }
        Ok(Arc::new(SchemaTree::new(name, file, imports)))
    }

    /// Marks `name` as waiting on `target`, unless that wait would close a cycle.
    ///
    /// Follows the waits of in-flight loads from `target`. Reaching any file in `chain` means
    /// `target` already waits, directly or through other loads, on a file that waits on `name`.
    fn begin_wait(&self, name: &str, target: &str, chain: &[String]) -> Result<(), SchemaError> {
        let mut slots = self.inner.slots.lock();
        {
            let mut walked = Vec::new();
            let mut seen = HashSet::new();
            let mut next = Some(target);
            while let Some(file) = next {
                walked.push(file);
                if chain.iter().any(|c| c == file) {
                    return Err(SchemaError::ParseError {
                        file: name.to_string(),
                        reason: format!(
                            "import cycle: {} -> {}",
                            chain.join(" -> "),
                            walked.join(" -> ")
                        ),
                    });
                }
                if !seen.insert(file) {
                    break;
                }
                next = match slots.get(file) {
                    Some(Slot::Loading { waiting_on, .. }) => waiting_on.as_deref(),
                    _ => None,
                };
            }
        }
        if let Some(Slot::Loading { waiting_on, .. }) = slots.get_mut(name) {
            *waiting_on = Some(target.to_string());
        }
        Ok(())
    }

    fn end_wait(&self, name: &str) {
        if let Some(Slot::Loading { waiting_on, .. }) = self.inner.slots.lock().get_mut(name) {
            *waiting_on = None;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_executor::block_on;
    use futures_util::future::{join, poll_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Poll;

    #[test]
    fn import_names() {
        assert_eq!(resolve_import("a/b/c.proto"), "c.proto");
        assert_eq!(resolve_import("/abs/c.proto"), "c.proto");
        assert_eq!(resolve_import("..\\win\\c.proto"), "c.proto");
        assert_eq!(resolve_import("c.proto"), "c.proto");
    }

    #[test]
    fn paths() {
        let reg = SchemaRegistry::new(Arc::new(MemorySource::new()), "proto/");
        assert_eq!(reg.path_for("x.proto"), "proto/x.proto");
        let reg = SchemaRegistry::new(Arc::new(MemorySource::new()), "");
        assert_eq!(reg.path_for("x.proto"), "x.proto");
    }

    #[test]
    fn loads_imports_by_base_name() {
        let source = MemorySource::new()
            .with_file("base.proto", "package base; message B { optional int32 x = 1; }")
            .with_file(
                "top.proto",
                "import \"../deeply/nested/base.proto\"; message T { optional base.B b = 1; }",
            );
        let reg = SchemaRegistry::new(Arc::new(source), "schemas");
        let tree = block_on(reg.load("top.proto")).unwrap();
        assert_eq!(tree.imports().len(), 1);
        assert_eq!(tree.imports()[0].name(), "base.proto");
        assert!(tree.message("base.B").is_some());
        // The import was cached under its canonical name.
        assert!(reg.cached("base.proto").is_some());
        assert!(Arc::ptr_eq(
            &reg.cached("top.proto").unwrap(),
            &block_on(reg.load("some/where/top.proto")).unwrap()
        ));
    }

    #[test]
    fn failures_are_not_cached() {
        struct Flaky(AtomicUsize);

        #[async_trait]
        impl SchemaSource for Flaky {
            async fn fetch(&self, _path: &str) -> std::io::Result<String> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "down"))
                } else {
                    Ok("message M {}".to_string())
                }
            }
        }

        let source = Arc::new(Flaky(AtomicUsize::new(0)));
        let reg = SchemaRegistry::new(source.clone(), "");
        match block_on(reg.load("m.proto")) {
            Err(SchemaError::SourceUnavailable { file, .. }) => assert_eq!(file, "m.proto"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(reg.cached("m.proto").is_none());
        assert!(block_on(reg.load("m.proto")).is_ok());
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let source = MemorySource::new()
            .with_file("good.proto", "import \"bad.proto\";")
            .with_file("bad.proto", "message {");
        let reg = SchemaRegistry::new(Arc::new(source), "");
        match block_on(reg.load("good.proto")) {
            Err(SchemaError::ParseError { file, .. }) => assert_eq!(file, "bad.proto"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(reg.cached("good.proto").is_none());
    }

    #[test]
    fn import_cycles() {
        let source = MemorySource::new()
            .with_file("a.proto", "import \"b.proto\";")
            .with_file("b.proto", "import \"x/a.proto\";");
        let reg = SchemaRegistry::new(Arc::new(source), "");
        let err = block_on(reg.load("a.proto")).unwrap_err();
        assert!(matches!(err, SchemaError::ParseError { .. }));
        assert!(err.to_string().contains("a.proto -> b.proto -> a.proto"));
    }

    #[test]
    fn concurrent_import_cycles_fail() {
        /// Gives the other load a turn before answering.
        struct Yielding(MemorySource);

        #[async_trait]
        impl SchemaSource for Yielding {
            async fn fetch(&self, path: &str) -> std::io::Result<String> {
                let mut yielded = false;
                poll_fn(|cx| {
                    if yielded {
                        Poll::Ready(())
                    } else {
                        yielded = true;
                        cx.waker().wake_by_ref();
                        Poll::Pending
                    }
                })
                .await;
                self.0.fetch(path).await
            }
        }

        let source = MemorySource::new()
            .with_file("a.proto", "import \"b.proto\";")
            .with_file("b.proto", "import \"a.proto\";");
        let reg = SchemaRegistry::new(Arc::new(Yielding(source)), "");
        let (a, b) = block_on(join(reg.load("a.proto"), reg.load("b.proto")));
        for result in [a, b] {
            match result {
                Err(SchemaError::ParseError { reason, .. }) => {
                    assert!(reason.contains("import cycle"), "{}", reason)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(reg.cached("a.proto").is_none());
        assert!(reg.cached("b.proto").is_none());
    }

    #[test]
    fn panicking_sources_are_not_cached() {
        struct Panicky(AtomicUsize);

        #[async_trait]
        impl SchemaSource for Panicky {
            async fn fetch(&self, _path: &str) -> std::io::Result<String> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("source blew up");
                }
                Ok("message M {}".to_string())
            }
        }

        let source = Arc::new(Panicky(AtomicUsize::new(0)));
        let reg = SchemaRegistry::new(source.clone(), "");
        match block_on(reg.load("m.proto")) {
            Err(SchemaError::SourceUnavailable { file, reason }) => {
                assert_eq!(file, "m.proto");
                assert!(reason.contains("panicked"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(reg.cached("m.proto").is_none());
        assert!(block_on(reg.load("m.proto")).is_ok());
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn builtin_schemas_parse() {
        let reg = SchemaRegistry::new(Arc::new(MemorySource::builtin()), "schemas");
        let tree = block_on(reg.load("buckets.proto")).unwrap();
        assert!(tree.message("buckets.SetBucket").is_some());
        assert!(tree.message("protostream.WrappedMessage").is_some());
    }
}
