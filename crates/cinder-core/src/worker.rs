use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// How a worker module's source should be interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleType {
    EsModule,
    CommonJs,
    Text,
    Data,
}

/// One module belonging to a worker. `path` is the module id the bundler
/// and the cache agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerModule {
    pub path: String,
    pub source: String,
    pub module_type: ModuleType,
}

impl WorkerModule {
    pub fn es_module(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            module_type: ModuleType::EsModule,
        }
    }
}

/// Opaque compatibility parameters forwarded to the engine untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityParams {
    pub date: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A single worker: entry module first, plain-text bindings, and
/// service bindings naming other workers in the same set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub name: String,
    pub modules: Vec<WorkerModule>,
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    #[serde(default)]
    pub service_bindings: HashMap<String, String>,
    #[serde(default)]
    pub compatibility: CompatibilityParams,
}

impl WorkerDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
            bindings: HashMap::new(),
            service_bindings: HashMap::new(),
            compatibility: CompatibilityParams::default(),
        }
    }

    /// The worker's entry module, when it has any modules at all.
    pub fn entry_module(&self) -> Option<&WorkerModule> {
        self.modules.first()
    }
}

/// Validated, ordered set of workers. The first worker is the entry worker
/// that receives external traffic. A set is replaced wholesale on reload,
/// never mutated in place.
#[derive(Debug, Clone)]
pub struct WorkerSet {
    workers: Vec<WorkerDefinition>,
}

impl WorkerSet {
    pub fn new(workers: Vec<WorkerDefinition>) -> Result<Self, String> {
        if workers.is_empty() {
            return Err("worker set must contain at least one worker".to_string());
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for worker in &workers {
            if worker.name.is_empty() {
                return Err("worker name must not be empty".to_string());
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(format!("duplicate worker name: {}", worker.name));
            }
        }
        for worker in &workers {
            for (binding, target) in &worker.service_bindings {
                if !seen.contains(target.as_str()) {
                    return Err(format!(
                        "worker {} service binding {} names unknown worker {}",
                        worker.name, binding, target
                    ));
                }
            }
        }
        Ok(Self { workers })
    }

    pub fn entry(&self) -> &WorkerDefinition {
        &self.workers[0]
    }

    pub fn get(&self, name: &str) -> Option<&WorkerDefinition> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerDefinition> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Clone of this set with the entry worker's bindings replaced.
    /// Backs env-only reloads.
    pub fn with_entry_bindings(&self, bindings: HashMap<String, String>) -> Self {
        let mut workers = self.workers.clone();
        workers[0].bindings = bindings;
        Self { workers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str) -> WorkerDefinition {
        let mut def = WorkerDefinition::new(name);
        def.modules.push(WorkerModule::es_module(
            format!("/{name}/index.js"),
            "export default {}",
        ));
        def
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(WorkerSet::new(vec![]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = WorkerSet::new(vec![worker("a"), worker("a")]).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_unknown_service_binding_rejected() {
        let mut entry = worker("entry");
        entry
            .service_bindings
            .insert("API".to_string(), "missing".to_string());
        let err = WorkerSet::new(vec![entry]).unwrap_err();
        assert!(err.contains("unknown worker"));
    }

    #[test]
    fn test_first_worker_is_entry() {
        let set = WorkerSet::new(vec![worker("entry"), worker("api")]).unwrap();
        assert_eq!(set.entry().name, "entry");
        assert!(set.get("api").is_some());
        assert!(set.get("nope").is_none());
    }

    #[test]
    fn test_with_entry_bindings_replaces_only_entry() {
        let mut entry = worker("entry");
        entry
            .bindings
            .insert("MODE".to_string(), "old".to_string());
        let set = WorkerSet::new(vec![entry, worker("api")]).unwrap();

        let mut env = HashMap::new();
        env.insert("MODE".to_string(), "new".to_string());
        let updated = set.with_entry_bindings(env);

        assert_eq!(updated.entry().bindings["MODE"], "new");
        assert!(updated.get("api").unwrap().bindings.is_empty());
        assert_eq!(set.entry().bindings["MODE"], "old");
    }
}
