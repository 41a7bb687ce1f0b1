//! A loaded project: its layout, its parsed `galley.toml`, and its instances.

use crate::instance::Instance;
use crate::CoreError;
use galley_plugin::{ConfigContext, PluginRegistry};
use galley_schema::{parse_project_file, InstanceConfig, ProjectFile};
use galley_store::ProjectLayout;
use regex::Regex;
use std::path::Path;
use tracing::debug;

pub struct Workspace {
    layout: ProjectLayout,
    instances: Vec<Instance>,
}

impl Workspace {
    /// Read `config` (relative paths resolve against `root`) and build every instance.
    pub fn load(root: &Path, config: &Path) -> Result<Self, CoreError> {
        let config_path = if config.is_absolute() {
            config.to_path_buf()
        } else {
            root.join(config)
        };
        if !config_path.is_file() {
            return Err(CoreError::User(format!(
                "no project file at {} (run 'galley init' to create one)",
                config_path.display()
            )));
        }
        let project = parse_project_file(&config_path)?;
        debug!("loaded project file {}", config_path.display());
        Self::from_project(root, &project, PluginRegistry::global())
    }

    pub fn from_project(
        root: &Path,
        project: &ProjectFile,
        registry: &PluginRegistry,
    ) -> Result<Self, CoreError> {
        let layout = ProjectLayout::new(root);
        let instances = project
            .instances()?
            .iter()
            .map(|config| build_instance(&layout, config, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { layout, instances })
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Instances matching `pattern`.
    ///
    /// No pattern or `all` selects everything; an exact instance name selects
    /// that instance; anything else is a regular expression over names.
    pub fn select(&self, pattern: Option<&str>) -> Result<Vec<&Instance>, CoreError> {
        let pattern = match pattern {
            None | Some("all") => return Ok(self.instances.iter().collect()),
            Some(p) => p,
        };

        if let Some(exact) = self.instances.iter().find(|i| *i.name() == *pattern) {
            return Ok(vec![exact]);
        }

        let re = Regex::new(pattern).map_err(|e| {
            CoreError::User(format!("invalid regular expression '{pattern}': {e}"))
        })?;
        let selected: Vec<&Instance> = self
            .instances
            .iter()
            .filter(|i| re.is_match(i.name()))
            .collect();
        if selected.is_empty() {
            return Err(CoreError::User(format!(
                "no instances for regex '{pattern}', try running 'galley list'"
            )));
        }
        Ok(selected)
    }
}

fn build_instance(
    layout: &ProjectLayout,
    config: &InstanceConfig,
    registry: &PluginRegistry,
) -> Result<Instance, CoreError> {
    let ctx = ConfigContext::new(
        config.name.clone(),
        &config.suite.name,
        &config.platform.name,
        layout.root(),
    );
    Instance::builder()
        .suite(config.suite.clone())
        .platform(config.platform.clone())
        .driver(registry.load_driver(&config.driver.name, &config.driver.config, &ctx)?)
        .provisioner(registry.load_provisioner(
            &config.provisioner.name,
            &config.provisioner.config,
            &ctx,
        )?)
        .verifier(registry.load_verifier(&config.verifier.name, &config.verifier.config, &ctx)?)
        .transport(registry.load_transport(
            &config.transport.name,
            &config.transport.config,
            &ctx,
        )?)
        .layout(layout.clone())
        .build()
}
