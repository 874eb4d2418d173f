use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::manifest::{self, ClassifyOptions, ModuleDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JarInfo {
    pub file_name: String,
    pub descriptor: ModuleDescriptor,
}

type Slot = Arc<Mutex<Option<Arc<JarInfo>>>>;

/// File name → classified descriptor, shared by every stage of one run.
///
/// Lookups for different names proceed in parallel; lookups for the same
/// name queue behind the slot lock so each jar is parsed at most once.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    options: ClassifyOptions,
    parses: AtomicUsize,
}

impl ModuleRegistry {
    pub fn new(options: ClassifyOptions) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            options,
            parses: AtomicUsize::new(0),
        }
    }

    pub fn get_or_add(&self, jar: &Path) -> Result<Arc<JarInfo>> {
        let slot = self.slot(&file_name(jar));
        let mut guard = lock(&slot);
        if let Some(info) = guard.as_ref() {
            return Ok(Arc::clone(info));
        }
        let info = self.classify(jar)?;
        *guard = Some(Arc::clone(&info));
        Ok(info)
    }

    pub fn add(&self, jar: &Path) -> Result<Arc<JarInfo>> {
        let slot = self.slot(&file_name(jar));
        let mut guard = lock(&slot);
        let info = self.classify(jar)?;
        *guard = Some(Arc::clone(&info));
        Ok(info)
    }

    pub fn get(&self, file_name: &str) -> Option<Arc<JarInfo>> {
        let slot = lock(&self.slots).get(file_name).cloned()?;
        let guard = lock(&slot);
        guard.clone()
    }

    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| lock(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn classify(&self, jar: &Path) -> Result<Arc<JarInfo>> {
        self.parses.fetch_add(1, Ordering::Relaxed);
        let descriptor = manifest::examine(jar, self.options)?;
        tracing::debug!(
            jar = %jar.display(),
            kind = ?descriptor.kind(),
            module = descriptor.module_id().unwrap_or("-"),
            "classified"
        );
        Ok(Arc::new(JarInfo {
            file_name: file_name(jar),
            descriptor,
        }))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Barrier;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::write::FileOptions;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "nb_cluster_registry_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_module_jar(path: &Path, manifest: &str) -> Result<()> {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path)?);
        zip.start_file(manifest::MANIFEST_ENTRY, FileOptions::default())?;
        zip.write_all(manifest.as_bytes())?;
        zip.finish()?;
        Ok(())
    }

    #[test]
    fn get_or_add_caches_by_file_name() -> Result<()> {
        let dir = temp_dir("cache");
        let jar = dir.join("a.jar");
        write_module_jar(&jar, "OpenIDE-Module: org.a\n")?;

        let registry = ModuleRegistry::default();
        let first = registry.get_or_add(&jar)?;
        write_module_jar(&jar, "OpenIDE-Module: org.changed\n")?;
        let second = registry.get_or_add(&jar)?;

        assert_eq!(registry.parse_count(), 1);
        assert_eq!(second.descriptor.module_id(), Some("org.a"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.get("a.jar").map(|i| i.file_name.clone()).as_deref(), Some("a.jar"));

        let refreshed = registry.add(&jar)?;
        assert_eq!(refreshed.descriptor.module_id(), Some("org.changed"));
        assert_eq!(registry.parse_count(), 2);
        assert_eq!(registry.len(), 1);

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn concurrent_lookups_parse_once() -> Result<()> {
        let dir = temp_dir("single_flight");
        let jar = dir.join("shared.jar");
        write_module_jar(&jar, "Bundle-SymbolicName: org.shared\n")?;

        let registry = ModuleRegistry::default();
        let callers = 8;
        let barrier = Barrier::new(callers);
        let results: Vec<Arc<JarInfo>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..callers)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.get_or_add(&jar).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.parse_count(), 1);
        assert!(results.iter().all(|r| **r == *results[0]));
        assert_eq!(results[0].descriptor.module_id(), Some("org_shared"));

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn failed_classification_is_not_cached() -> Result<()> {
        let dir = temp_dir("failure");
        let jar = dir.join("broken.jar");
        std::fs::write(&jar, b"not a zip")?;

        let registry = ModuleRegistry::default();
        assert!(registry.get_or_add(&jar).is_err());
        assert!(registry.is_empty());

        write_module_jar(&jar, "OpenIDE-Module: org.fixed\n")?;
        assert_eq!(
            registry.get_or_add(&jar)?.descriptor.module_id(),
            Some("org.fixed")
        );
        assert_eq!(registry.parse_count(), 2);

        std::fs::remove_dir_all(dir)?;
        Ok(())
    }
}
