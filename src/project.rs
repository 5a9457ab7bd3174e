//! Project isolation: one independent SQLite store per project.
//!
//! Layout under the workspace root:
//!
//! ```text
//! <root>/
//!   active-project          name of the active project
//!   projects/<name>/roadmap.db
//! ```
//!
//! The active project is only a persisted default. Callers resolve a
//! [`ProjectContext`] once and pass it explicitly to [`Workspace::open_project`].

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::db::{Repository, DEFAULT_PROJECT_CODE};
use crate::error::{Error, Result};
use crate::events::RepositoryObserver;

const PROJECTS_DIR: &str = "projects";
const DATABASE_FILE: &str = "roadmap.db";
const ACTIVE_PROJECT_FILE: &str = "active-project";

/// A validated project name: ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn parse(name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::validation(format!(
                "invalid project name '{}': use letters, digits, hyphens or underscores",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Up to four upper-cased alphanumerics of the name, e.g. `my-app` -> `MYAP`.
    pub fn derived_code(&self) -> String {
        let code: String = self
            .0
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(4)
            .collect::<String>()
            .to_ascii_uppercase();
        if code.is_empty() {
            DEFAULT_PROJECT_CODE.to_string()
        } else {
            code
        }
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The project an operation targets, resolved once by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectContext {
    pub name: ProjectName,
    pub db_path: PathBuf,
}

pub struct Workspace {
    root: PathBuf,
    default_project: String,
    busy_timeout: Duration,
    observers: Vec<Arc<dyn RepositoryObserver>>,
    handles: Mutex<HashMap<ProjectName, Repository>>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_project: "default".to_string(),
            busy_timeout: Duration::from_secs(5),
            observers: Vec::new(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_project(mut self, name: impl Into<String>) -> Self {
        self.default_project = name.into();
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Observer attached to every repository this workspace opens.
    pub fn with_observer(mut self, observer: Arc<dyn RepositoryObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self, name: &ProjectName) -> ProjectContext {
        ProjectContext {
            name: name.clone(),
            db_path: self.project_dir(name).join(DATABASE_FILE),
        }
    }

    pub fn project_exists(&self, name: &ProjectName) -> bool {
        self.project_dir(name).is_dir()
    }

    /// Creates the project's store and records its id code (derived from the
    /// name when `code` is `None`).
    pub fn create_project(&self, name: &str, code: Option<&str>) -> Result<ProjectContext> {
        let name = ProjectName::parse(name)?;
        if self.project_exists(&name) {
            return Err(Error::already_exists(format!("project {}", name)));
        }

        let ctx = self.context(&name);
        fs::create_dir_all(self.project_dir(&name))?;
        let code = code.map(str::to_string).unwrap_or_else(|| name.derived_code());
        let repo = match self
            .open_repository(&ctx.db_path)
            .and_then(|repo| repo.set_project_code(&code).map(|()| repo))
        {
            Ok(repo) => repo,
            Err(e) => {
                let _ = fs::remove_dir_all(self.project_dir(&name));
                return Err(e);
            }
        };

        self.handles().insert(name.clone(), repo);
        info!(project = %name, path = %ctx.db_path.display(), "project created");
        Ok(ctx)
    }

    /// Repository for `ctx`, opened on first use and reused afterwards.
    pub fn open_project(&self, ctx: &ProjectContext) -> Result<Repository> {
        let mut handles = self.handles();
        if let Some(repo) = handles.get(&ctx.name) {
            return Ok(repo.clone());
        }
        if !ctx.db_path.exists() {
            return Err(Error::not_found(format!("project {}", ctx.name)));
        }
        let repo = self.open_repository(&ctx.db_path)?;
        handles.insert(ctx.name.clone(), repo.clone());
        debug!(project = %ctx.name, "project opened");
        Ok(repo)
    }

    /// Project names, sorted.
    pub fn list_projects(&self) -> Result<Vec<ProjectName>> {
        let dir = self.root.join(PROJECTS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(name) = ProjectName::parse(name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// The persisted active project, if one was chosen.
    pub fn active_project(&self) -> Result<Option<ProjectName>> {
        let path = self.root.join(ACTIVE_PROJECT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let name = content.trim();
        if name.is_empty() {
            return Ok(None);
        }
        ProjectName::parse(name).map(Some)
    }

    pub fn set_active_project(&self, name: &str) -> Result<ProjectContext> {
        let name = ProjectName::parse(name)?;
        if !self.project_exists(&name) {
            return Err(Error::not_found(format!("project {}", name)));
        }
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(ACTIVE_PROJECT_FILE), name.as_str())?;
        info!(project = %name, "active project set");
        Ok(self.context(&name))
    }

    /// The project an invocation works on: `override_name`, else the active
    /// project, else the configured default.
    pub fn resolve(&self, override_name: Option<&str>) -> Result<ProjectContext> {
        let name = match override_name {
            Some(name) => ProjectName::parse(name)?,
            None => self.effective_active()?,
        };
        Ok(self.context(&name))
    }

    /// Deletes a project and all its data. The active project cannot be
    /// deleted.
    pub fn delete_project(&self, name: &str) -> Result<()> {
        let name = ProjectName::parse(name)?;
        if !self.project_exists(&name) {
            return Err(Error::not_found(format!("project {}", name)));
        }
        if self.effective_active()? == name {
            return Err(Error::invalid(format!(
                "cannot delete active project {} (switch to another project first)",
                name
            )));
        }

        self.handles().remove(&name);
        fs::remove_dir_all(self.project_dir(&name))?;
        info!(project = %name, "project deleted");
        Ok(())
    }

    fn effective_active(&self) -> Result<ProjectName> {
        match self.active_project()? {
            Some(name) => Ok(name),
            None => ProjectName::parse(&self.default_project),
        }
    }

    fn open_repository(&self, path: &Path) -> Result<Repository> {
        let mut repo = Repository::open(path, self.busy_timeout)?;
        repo.migrate()?;
        for observer in &self.observers {
            repo = repo.with_observer(Arc::clone(observer));
        }
        Ok(repo)
    }

    fn project_dir(&self, name: &ProjectName) -> PathBuf {
        self.root.join(PROJECTS_DIR).join(name.as_str())
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<ProjectName, Repository>> {
        self.handles.lock().expect("project handle cache poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_restricted() {
        assert!(ProjectName::parse("web-app_2").is_ok());
        assert!(ProjectName::parse("").is_err());
        assert!(ProjectName::parse("../etc").is_err());
        assert!(ProjectName::parse("with space").is_err());
    }

    #[test]
    fn derived_code_uses_leading_alphanumerics() {
        assert_eq!(ProjectName::parse("my-app").unwrap().derived_code(), "MYAP");
        assert_eq!(ProjectName::parse("ui").unwrap().derived_code(), "UI");
        assert_eq!(ProjectName::parse("__").unwrap().derived_code(), DEFAULT_PROJECT_CODE);
    }
}
