//! Parameter database.
//!
//! The backing file is a JSON object mapping parameter id to its serialized
//! bytes. A missing or unreadable file leaves the database empty; callers log
//! the error and continue.

use super::task::{ActiveTask, Dispatch};
use super::{component_name, ActiveComponent, Component, ComponentCore};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const PRM_DB_COMMANDS: &[&str] = &["PRM_SAVE_FILE"];

#[derive(Debug, Error)]
pub enum ParamDbError {
    #[error("parameter database has no backing file configured")]
    NotConfigured,
    #[error("cannot access parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parameter file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct ParamDb {
    core: ComponentCore,
    task: ActiveTask,
    path: Option<PathBuf>,
    params: BTreeMap<u32, Vec<u8>>,
}

impl ParamDb {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            path: None,
            params: BTreeMap::new(),
        }
    }

    pub fn configure(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replaces the in-memory table with the file contents. On error the
    /// table is left empty.
    pub fn read_param_file(&mut self) -> Result<usize, ParamDbError> {
        self.params.clear();
        let path = self.path.as_ref().ok_or(ParamDbError::NotConfigured)?;
        let text = fs::read_to_string(path).map_err(|source| ParamDbError::Io {
            path: path.clone(),
            source,
        })?;
        let params: BTreeMap<u32, Vec<u8>> = serde_json::from_str(&text).map_err(|source| ParamDbError::Parse {
            path: path.clone(),
            source,
        })?;
        self.params = params;
        info!(component = self.core.name(), path = %path.display(), count = self.params.len(), "parameters loaded");
        Ok(self.params.len())
    }

    pub fn save_param_file(&self) -> Result<(), ParamDbError> {
        let path = self.path.as_ref().ok_or(ParamDbError::NotConfigured)?;
        let text = serde_json::to_string_pretty(&self.params).map_err(|source| ParamDbError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ParamDbError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(component = self.core.name(), count = self.params.len(), "parameters saved");
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.params.get(&id).map(Vec::as_slice)
    }

    pub fn set(&mut self, id: u32, value: Vec<u8>) {
        self.params.insert(id, value);
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters whose id falls in `[base, base + span)`.
    pub fn count_in_range(&self, base: u32, span: u32) -> usize {
        self.params.range(base..base.saturating_add(span)).count()
    }
}

impl Component for ParamDb {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.task.initialize(queue_depth);
        self.params.clear();
    }

    fn commands(&self) -> &'static [&'static str] {
        PRM_DB_COMMANDS
    }
}

impl ActiveComponent for ParamDb {
    fn task(&self) -> &ActiveTask {
        &self.task
    }

    fn task_mut(&mut self) -> &mut ActiveTask {
        &mut self.task
    }

    fn dispatcher(&self) -> Box<dyn Dispatch> {
        Box::new(|_context: u32, _tick: u64| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_leaves_database_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = ParamDb::new("a_prmDb", 96);
        db.set(1, vec![9]);
        db.configure(dir.path().join("PrmDb.dat"));

        let err = db.read_param_file().unwrap_err();
        assert!(matches!(err, ParamDbError::Io { .. }));
        assert!(db.is_empty());
    }

    #[test]
    fn test_save_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PrmDb.dat");

        let mut db = ParamDb::new("a_prmDb", 96);
        db.configure(&path);
        db.set(0x0201, vec![1, 2, 3]);
        db.set(0x0500, vec![4]);
        db.save_param_file().unwrap();

        let mut reloaded = ParamDb::new("a_prmDb", 96);
        reloaded.configure(&path);
        assert_eq!(reloaded.read_param_file().unwrap(), 2);
        assert_eq!(reloaded.get(0x0201), Some(&[1u8, 2, 3][..]));
        assert_eq!(reloaded.count_in_range(0x0200, 0x100), 1);
    }

    #[test]
    fn test_malformed_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PrmDb.dat");
        fs::write(&path, "not json").unwrap();

        let mut db = ParamDb::new("a_prmDb", 96);
        db.configure(&path);
        assert!(matches!(db.read_param_file(), Err(ParamDbError::Parse { .. })));
        assert!(db.is_empty());
    }

    #[test]
    fn test_unconfigured_read() {
        let mut db = ParamDb::new("a_prmDb", 96);
        assert!(matches!(db.read_param_file(), Err(ParamDbError::NotConfigured)));
    }
}
