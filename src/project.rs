use std::{
    fs::{self, read_to_string, OpenOptions},
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{anyhow, bail, Context as _, Result};
use serde::{Deserialize, Serialize};

pub const PROJECT_FILE: &str = ".tmporc";

/// Project settings kept in a `.tmporc` file, applying to the directory that
/// holds it and everything below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
}

impl ProjectConfig {
    /// Searches `start` and then each of its ancestors for a project file,
    /// returning the first one found.
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_FILE))
            .find(|candidate| candidate.is_file())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = read_to_string(path)
            .with_context(|| format!("Could not read project file {path:?}"))?;
        toml::from_str(&contents)
            .with_context(|| format!("Could not parse project file {path:?} (check the file syntax)"))
    }

    /// The nearest project file above `start` together with its contents.
    pub fn find_and_load(start: &Path) -> Result<Option<(PathBuf, Self)>> {
        match Self::find(start) {
            Some(path) => {
                log::debug!("Found project file at {path:?}");
                let config = Self::load(&path)?;
                Ok(Some((path, config)))
            }
            None => Ok(None),
        }
    }

    /// Writes a new project file into `dir`, refusing to replace one.
    pub fn create(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(PROJECT_FILE);
        let contents = toml::to_string_pretty(self)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                bail!("A {PROJECT_FILE} file already exists in {dir:?}")
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Could not create project file {path:?}"))
            }
        };
        file.write_all(contents.as_bytes())?;
        log::info!("Created project file at {path:?}");
        Ok(path)
    }
}

/// A project registered for use from any directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
}

/// The `projects.toml` registry.  Names are unique ignoring case and
/// surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsRegistry {
    projects: Vec<GlobalProject>,
}

impl ProjectsRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        log::debug!("Reading project registry at path {path:?}");
        let contents = match read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Could not read project registry at {path:?}"))
            }
        };
        toml::from_str(&contents).with_context(|| {
            format!("Could not parse project registry at {path:?} (check the file syntax)")
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create config directory {dir:?}"))?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Could not write project registry to {path:?}"))
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let name = name.to_lowercase();
        self.projects
            .iter()
            .position(|project| project.name.to_lowercase() == name)
    }

    pub fn get(&self, name: &str) -> Option<&GlobalProject> {
        self.position(name).map(|index| &self.projects[index])
    }

    pub fn exists(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn add(&mut self, mut project: GlobalProject) -> Result<()> {
        project.name = project.name.trim().to_string();
        if project.name.is_empty() {
            bail!("Project name cannot be empty");
        }
        if self.exists(&project.name) {
            bail!("Project '{}' already exists", project.name);
        }
        self.projects.push(project);
        Ok(())
    }

    /// Replaces a project's record.  An empty name in `project` keeps the
    /// registered one.
    pub fn update(&mut self, name: &str, mut project: GlobalProject) -> Result<()> {
        let index = self
            .position(name)
            .ok_or_else(|| anyhow!("Project '{name}' not found"))?;
        if project.name.trim().is_empty() {
            project.name = self.projects[index].name.clone();
        }
        self.projects[index] = project;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<GlobalProject> {
        let index = self
            .position(name)
            .ok_or_else(|| anyhow!("Project '{name}' not found"))?;
        Ok(self.projects.remove(index))
    }

    pub fn list(&self) -> &[GlobalProject] {
        &self.projects
    }
}

/// Base name of the git repository containing `dir`, if any.  A missing git
/// binary counts as not being in a repository.
pub fn git_repo_name(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8(output.stdout).ok()?;
    base_name(Path::new(root.trim()))
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

/// Billing settings that apply to one project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedProject {
    pub hourly_rate: Option<f64>,
    pub export_path: Option<String>,
}

/// Works out which project a command applies to, and its settings.
pub struct ProjectResolver {
    cwd: PathBuf,
    registry: ProjectsRegistry,
    vcs: fn(&Path) -> Option<String>,
}

impl ProjectResolver {
    pub fn new(cwd: PathBuf, registry: ProjectsRegistry) -> Self {
        Self::with_vcs(cwd, registry, git_repo_name)
    }

    pub fn with_vcs(
        cwd: PathBuf,
        registry: ProjectsRegistry,
        vcs: fn(&Path) -> Option<String>,
    ) -> Self {
        Self { cwd, registry, vcs }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn registry(&self) -> &ProjectsRegistry {
        &self.registry
    }

    /// The project for this invocation.  The first source that knows wins:
    /// an explicit name (which must be registered), the nearest project file,
    /// the enclosing git repository, and finally the current directory.
    pub fn detect_project(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(name) = explicit {
            if !self.registry.exists(name) {
                bail!("Project '{name}' not found in the global registry (register it with `tmpo init --global`)");
            }
            return Ok(name.to_string());
        }

        if let Some((path, config)) = ProjectConfig::find_and_load(&self.cwd)? {
            let declared = config.project_name.trim();
            if !declared.is_empty() {
                return Ok(declared.to_string());
            }
            if let Some(name) = path.parent().and_then(base_name) {
                return Ok(name);
            }
        }

        if let Some(name) = (self.vcs)(&self.cwd) {
            log::debug!("Using git repository name {name}");
            return Ok(name);
        }

        Ok(base_name(&self.cwd).unwrap_or_else(|| self.cwd.display().to_string()))
    }

    /// Rate and export path for `name`.  A registered project wins outright;
    /// otherwise a project file declaring the same name is used.
    pub fn project_config(&self, name: &str) -> Result<ResolvedProject> {
        if let Some(project) = self.registry.get(name) {
            return Ok(ResolvedProject {
                hourly_rate: project.hourly_rate,
                export_path: non_empty(project.export_path.as_deref()),
            });
        }

        if let Some((_, config)) = ProjectConfig::find_and_load(&self.cwd)? {
            if config.project_name.trim() == name.trim() {
                return Ok(ResolvedProject {
                    hourly_rate: config.hourly_rate.filter(|rate| *rate > 0.0),
                    export_path: non_empty(config.export_path.as_deref()),
                });
            }
        }

        Ok(ResolvedProject::default())
    }
}

fn non_empty(path: Option<&str>) -> Option<String> {
    path.map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vcs(_: &Path) -> Option<String> {
        None
    }

    fn fixed_vcs(_: &Path) -> Option<String> {
        Some("repo-root".into())
    }

    fn write_project_file(dir: &Path, contents: &str) {
        fs::write(dir.join(PROJECT_FILE), contents).unwrap();
    }

    fn registry_with(name: &str, rate: f64, export_path: &str) -> ProjectsRegistry {
        let mut registry = ProjectsRegistry::default();
        registry
            .add(GlobalProject {
                name: name.into(),
                hourly_rate: Some(rate),
                export_path: Some(export_path.into()),
                ..Default::default()
            })
            .unwrap();
        registry
    }

    #[test]
    fn explicit_project_must_be_registered() {
        let dir = tempfile::tempdir().unwrap();
        let resolver =
            ProjectResolver::with_vcs(dir.path().into(), ProjectsRegistry::default(), no_vcs);

        let err = resolver.detect_project(Some("Ghost")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn explicit_project_bypasses_the_project_file() {
        let dir = tempfile::tempdir().unwrap();
        write_project_file(dir.path(), "project_name = \"Local\"\n");
        let resolver = ProjectResolver::with_vcs(
            dir.path().into(),
            registry_with("Client Work", 90.0, ""),
            fixed_vcs,
        );

        assert_eq!(resolver.detect_project(Some("client work")).unwrap(), "client work");
        assert_eq!(resolver.detect_project(None).unwrap(), "Local");
    }

    #[test]
    fn nearest_project_file_wins_over_ancestors() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("outer").join("inner");
        fs::create_dir_all(&nested).unwrap();
        write_project_file(root.path(), "project_name = \"Root\"\n");
        write_project_file(&root.path().join("outer"), "project_name = \"Outer\"\n");

        let resolver =
            ProjectResolver::with_vcs(nested.clone(), ProjectsRegistry::default(), fixed_vcs);
        assert_eq!(resolver.detect_project(None).unwrap(), "Outer");
        assert_eq!(
            ProjectConfig::find(&nested),
            Some(root.path().join("outer").join(PROJECT_FILE))
        );
    }

    #[test]
    fn unnamed_project_file_uses_its_directory_name() {
        let root = tempfile::tempdir().unwrap();
        let project_dir = root.path().join("website");
        let nested = project_dir.join("src");
        fs::create_dir_all(&nested).unwrap();
        write_project_file(&project_dir, "hourly_rate = 50.0\n");

        let resolver = ProjectResolver::with_vcs(nested, ProjectsRegistry::default(), fixed_vcs);
        assert_eq!(resolver.detect_project(None).unwrap(), "website");
    }

    #[test]
    fn falls_back_to_git_then_directory_name() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scratch");
        fs::create_dir_all(&dir).unwrap();

        let resolver =
            ProjectResolver::with_vcs(dir.clone(), ProjectsRegistry::default(), fixed_vcs);
        assert_eq!(resolver.detect_project(None).unwrap(), "repo-root");

        let resolver = ProjectResolver::with_vcs(dir, ProjectsRegistry::default(), no_vcs);
        assert_eq!(resolver.detect_project(None).unwrap(), "scratch");
    }

    #[test]
    fn malformed_project_file_is_an_error_naming_it() {
        let dir = tempfile::tempdir().unwrap();
        write_project_file(dir.path(), "project_name = ");
        let resolver =
            ProjectResolver::with_vcs(dir.path().into(), ProjectsRegistry::default(), no_vcs);

        let err = resolver.detect_project(None).unwrap_err();
        assert!(format!("{err}").contains(PROJECT_FILE));
    }

    #[test]
    fn registry_settings_beat_the_project_file() {
        let dir = tempfile::tempdir().unwrap();
        write_project_file(
            dir.path(),
            "project_name = \"A\"\nhourly_rate = 10.0\nexport_path = \"/local\"\n",
        );
        let resolver = ProjectResolver::with_vcs(
            dir.path().into(),
            registry_with("A", 150.0, "/global"),
            no_vcs,
        );

        assert_eq!(resolver.detect_project(None).unwrap(), "A");
        assert_eq!(
            resolver.project_config("A").unwrap(),
            ResolvedProject {
                hourly_rate: Some(150.0),
                export_path: Some("/global".into()),
            }
        );
    }

    #[test]
    fn project_file_settings_apply_to_its_own_project_only() {
        let dir = tempfile::tempdir().unwrap();
        write_project_file(
            dir.path(),
            "project_name = \"A\"\nhourly_rate = 0.0\nexport_path = \"/local\"\n",
        );
        let resolver =
            ProjectResolver::with_vcs(dir.path().into(), ProjectsRegistry::default(), no_vcs);

        assert_eq!(
            resolver.project_config("A").unwrap(),
            ResolvedProject {
                hourly_rate: None,
                export_path: Some("/local".into()),
            }
        );
        assert_eq!(resolver.project_config("B").unwrap(), ResolvedProject::default());
    }

    #[test]
    fn project_files_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig {
            project_name: "Site".into(),
            hourly_rate: Some(75.0),
            ..Default::default()
        };

        let path = config.create(dir.path()).unwrap();
        assert_eq!(ProjectConfig::load(&path).unwrap(), config);
        assert!(config.create(dir.path()).is_err());
    }

    #[test]
    fn registry_names_are_case_insensitive_and_unique() {
        let mut registry = ProjectsRegistry::default();
        registry
            .add(GlobalProject {
                name: "  Acme  ".into(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(registry.get("ACME").unwrap().name, "Acme");
        assert!(registry.exists(" acme "));
        assert!(!registry.exists(""));
        assert!(registry
            .add(GlobalProject {
                name: "acme".into(),
                ..Default::default()
            })
            .is_err());
        assert!(registry.add(GlobalProject::default()).is_err());

        registry
            .update(
                "acme",
                GlobalProject {
                    hourly_rate: Some(20.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(registry.get("acme").unwrap().name, "Acme");
        assert_eq!(registry.get("acme").unwrap().hourly_rate, Some(20.0));

        assert_eq!(registry.remove("ACME").unwrap().name, "Acme");
        assert!(registry.list().is_empty());
        assert!(registry.remove("acme").is_err());
    }

    #[test]
    fn registry_names_fold_non_ascii_case() {
        let mut registry = ProjectsRegistry::default();
        registry
            .add(GlobalProject {
                name: "Café".into(),
                ..Default::default()
            })
            .unwrap();

        assert!(registry.exists("CAFÉ"));
        assert_eq!(registry.get("café").unwrap().name, "Café");
        assert!(registry
            .add(GlobalProject {
                name: "CAFÉ".into(),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn registry_round_trips_through_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.toml");
        assert_eq!(ProjectsRegistry::load(&path).unwrap(), ProjectsRegistry::default());

        let registry = registry_with("Acme", 120.0, "~/exports");
        registry.save(&path).unwrap();
        assert_eq!(ProjectsRegistry::load(&path).unwrap(), registry);
    }
}
