//! Recipe-level orchestration: locate and lint recipes, assemble the run
//! configuration and values stores, select target hosts, and drive the
//! concurrent group runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tracing::info;

use smelter_types::recipe::{is_valid_recipe_name, is_valid_sequence_key, is_valid_version};
use smelter_types::{ApplyDefaults, Config, Recipe, Sequence, Store, UserInfo, Value};

use crate::instance::ExecutionInstance;
use crate::report::RunReport;
use crate::transport::ssh::{SshTarget, SshTransport};
use crate::transport::{is_loopback_host, LocalTransport, Transport};
use crate::{loader, runner, stack};

/// Inputs for one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub recipe_dir: PathBuf,
    /// Extra config layers, stacked in order after (or instead of) the
    /// recipe's `config.yaml`.
    pub config_paths: Vec<PathBuf>,
    /// Extra values layers, overlaid in order after the recipe's
    /// `values.yaml`.
    pub values_paths: Vec<PathBuf>,
    /// Public sequence name from `recipe.yaml`.
    pub sequence: String,
    /// Host identifiers and/or group tags; the literal `all` selects every
    /// configured host.
    pub targets: Vec<String>,
    pub debug: bool,
    pub json: bool,
}

/// Loads `recipe.yaml` from a recipe directory.
pub fn load_recipe(dir: &Path) -> Result<Recipe> {
    let path = dir.join("recipe.yaml");
    if !path.exists() {
        bail!("unable to locate recipe.yaml, are you sure this is a smelter recipe?");
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("unable to load recipe file {}", path.display()))?;
    serde_yaml::from_str(&text).context("unable to unmarshal recipe data")
}

/// Reads just the description of a sequence file, for `info` output.
pub fn peek_sequence_description(dir: &Path, relative: &str) -> Result<String> {
    let path = dir.join(relative);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("unable to read sequence at {}", path.display()))?;
    let sequence: Sequence = serde_yaml::from_str(&loader::rewrite_delimiters(&text))
        .with_context(|| format!("unable to parse sequence at {}", path.display()))?;
    Ok(sequence.description)
}

/// Validates recipe metadata and every referenced sequence. Grammar
/// violations log one line each and flip the result to false; unreadable or
/// unparsable files are hard errors.
pub fn lint_recipe(dir: &Path) -> Result<(Recipe, bool)> {
    let recipe = load_recipe(dir)?;
    let mut lint_ok = true;

    if recipe.name.is_empty() {
        lint_ok = false;
        info!("recipe name is not specified");
    } else if !is_valid_recipe_name(&recipe.name) {
        lint_ok = false;
        info!("recipe name can only contain lowercase alphanumeric characters or underscores and must begin with a letter");
    }

    if recipe.description.is_empty() {
        lint_ok = false;
        info!("recipe description is not specified");
    }

    if recipe.version.is_empty() {
        lint_ok = false;
        info!("recipe version is not specified");
    } else if !is_valid_version(&recipe.version) {
        lint_ok = false;
        info!("recipe version must follow semantic versioning style (eg. <maj>.<min>.<patch>[.<extra>])");
    }

    if recipe.sequences.is_empty() {
        lint_ok = false;
        info!("recipe has no public sequences defined");
    } else {
        for (name, sequence_path) in &recipe.sequences {
            if !is_valid_sequence_key(name) {
                lint_ok = false;
                info!("sequence name {name} contains characters beyond lower-cased letters");
            }

            let full_path = dir.join(sequence_path);
            if !full_path.exists() {
                bail!("sequence {} pointed to bad path {}", name, full_path.display());
            }
            loader::load_sequence(dir, Path::new(sequence_path))
                .with_context(|| format!("sequence at {sequence_path} contained an error"))?;
        }
    }

    if lint_ok {
        info!("lint of {} was successful", dir.display());
    }

    Ok((recipe, lint_ok))
}

/// Scaffolds a new recipe directory under `parent`.
pub fn init_recipe(parent: &Path, name: &str, sequence_names: &[String]) -> Result<PathBuf> {
    let name = name.to_lowercase();
    let recipe_dir = parent.join(&name);
    if recipe_dir.exists() {
        bail!("something already exists with the name: {name}");
    }

    std::fs::create_dir(&recipe_dir)?;
    let sequences_dir = recipe_dir.join("sequences");
    std::fs::create_dir(&sequences_dir)?;

    let mut names: Vec<String> = sequence_names.iter().map(|n| n.to_lowercase()).collect();
    if names.is_empty() {
        names.push("myseq".to_string());
    }

    let mut sequence_entries = String::new();
    for sequence_name in &names {
        std::fs::write(
            sequences_dir.join(sequence_name),
            format!("name: {sequence_name}\ndescription: it does this\nsequence: []\n"),
        )?;
        sequence_entries.push_str(&format!("  {sequence_name}: sequences/{sequence_name}\n"));
    }

    std::fs::write(
        recipe_dir.join("recipe.yaml"),
        format!("name: {name}\ndescription: my new recipe\nversion: 0.0.1\nsequences:\n{sequence_entries}"),
    )?;
    std::fs::write(recipe_dir.join("values.yaml"), "")?;

    Ok(recipe_dir)
}

/// Executes a named sequence against the selected targets and returns the
/// aggregated report.
pub fn run_sequence(options: RunOptions) -> Result<RunReport> {
    let recipe = load_recipe(&options.recipe_dir)?;
    if recipe.sequences.is_empty() {
        bail!("no public sequences exist for this recipe");
    }
    let Some(sequence_path) = recipe.sequences.get(&options.sequence) else {
        bail!("sequence \"{}\" does not exist", options.sequence);
    };

    let config = load_config(&options)?;
    let values = load_values(&options)?;

    let host_idents = select_hosts(&config, &options.targets)?;

    let sequence = loader::load_sequence(&options.recipe_dir, Path::new(sequence_path))?;

    let config = Arc::new(config);
    let values = Arc::new(values);
    let mut instances = Vec::with_capacity(host_idents.len());
    for ident in &host_idents {
        let mut transport = build_transport(&config, ident);
        transport
            .connect()
            .with_context(|| format!("unable to create executor for host \"{ident}\""))?;
        instances.push(ExecutionInstance::new(
            sequence.clone(),
            transport,
            Arc::clone(&config),
            Arc::clone(&values),
            ident.clone(),
        ));
    }

    runner::run_group(
        &mut instances,
        config.executor.sync_execution_steps,
        config.executor.max_concurrent_hosts,
    );

    let report = RunReport::from_instances(&values, &instances, config.debug);
    for instance in &mut instances {
        instance.close();
    }
    Ok(report)
}

fn load_config(options: &RunOptions) -> Result<Config> {
    let mut config_paths = Vec::new();
    if options.config_paths.is_empty() {
        let default_path = options.recipe_dir.join("config.yaml");
        if !default_path.exists() {
            bail!("you must provide a config.yaml, either in the root of your recipe, or by supplying its location via flag");
        }
        config_paths.push(default_path);
    } else {
        for path in &options.config_paths {
            config_paths.push(resolve_path(&options.recipe_dir, path));
        }
    }

    let merged = stack::stack_yaml_files(&config_paths)?;
    let mut config: Config =
        serde_yaml::from_str(&merged).context("yaml provided was incompatible with the config spec")?;
    config.apply_defaults();
    config.user = UserInfo::current();
    config.debug = options.debug;
    config.json = options.json;
    config.cwd = options.recipe_dir.clone();
    config.expand_home_paths();
    Ok(config)
}

fn load_values(options: &RunOptions) -> Result<Store> {
    let mut values_paths = Vec::new();
    let default_path = options.recipe_dir.join("values.yaml");
    if default_path.exists() {
        values_paths.push(default_path);
    }
    for path in &options.values_paths {
        values_paths.push(resolve_path(&options.recipe_dir, path));
    }

    let mut values = Store::new();
    for path in values_paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("unable to read values file at {}", path.display()))?;
        if text.trim().is_empty() {
            continue;
        }
        let layer: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("unable to parse yaml from values file at {}", path.display()))?;
        match layer {
            Value::Mapping(mapping) => {
                values = values.overlay(&Store::from_mapping(mapping));
            }
            Value::Absent => {}
            other => bail!(
                "values file at {} must contain a mapping, found {}",
                path.display(),
                other.kind()
            ),
        }
    }
    Ok(values)
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Expands targets (host identifiers, group tags, or `all`) into the list
/// of host identities to run against, preserving configuration order.
fn select_hosts(config: &Config, targets: &[String]) -> Result<Vec<String>> {
    if targets.is_empty() {
        bail!("must specify a deploy target, or `all` for all targets");
    }

    let select_all = targets.len() == 1 && targets[0] == "all";
    let mut selected = Vec::new();
    for (ident, host) in &config.hosts {
        let matched = select_all
            || targets.iter().any(|target| target == ident)
            || (!host.group.is_empty() && targets.iter().any(|target| target == &host.group));
        if matched {
            selected.push(ident.clone());
        }
    }

    if selected.is_empty() {
        bail!("no hosts specified");
    }
    Ok(selected)
}

/// Chooses the transport for a host: loopback addresses run locally,
/// everything else goes over ssh with the resolved per-host settings.
fn build_transport(config: &Config, ident: &str) -> Box<dyn Transport> {
    let (host, port) = config.address(ident);
    if is_loopback_host(&host) {
        return Box::new(LocalTransport::new());
    }
    Box::new(SshTransport::new(SshTarget {
        host,
        port,
        user: config.username(ident),
        key_path: config.key_path(ident),
        known_hosts_path: config.known_hosts_path(ident),
        allow_unknown_hosts: config.allow_unknown_hosts(ident),
        ignore_host_key_change: config.ignore_host_key_change(ident),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn valid_recipe(dir: &TempDir) {
        write(
            dir,
            "recipe.yaml",
            "name: fleet\ndescription: test recipe\nversion: 0.0.1\nsequences:\n  deploy: sequences/deploy\n",
        );
        write(
            dir,
            "sequences/deploy",
            "name: deploy\ndescription: deploys\nsequence:\n  - name: hello\n    shell: echo hi\n",
        );
    }

    #[test]
    fn lint_accepts_a_valid_recipe() {
        let dir = TempDir::new().unwrap();
        valid_recipe(&dir);
        let (recipe, ok) = lint_recipe(dir.path()).unwrap();
        assert!(ok);
        assert_eq!(recipe.name, "fleet");
    }

    #[test]
    fn lint_flags_grammar_violations() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "recipe.yaml",
            "name: BadName\ndescription: x\nversion: 1.2\nsequences:\n  deploy: sequences/deploy\n",
        );
        write(&dir, "sequences/deploy", "sequence: []\n");
        let (_, ok) = lint_recipe(dir.path()).unwrap();
        assert!(!ok);
    }

    #[test]
    fn lint_errors_on_missing_sequence_file() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "recipe.yaml",
            "name: fleet\ndescription: x\nversion: 0.0.1\nsequences:\n  deploy: sequences/nope\n",
        );
        assert!(lint_recipe(dir.path()).is_err());
    }

    #[test]
    fn init_scaffolds_recipe_layout() {
        let dir = TempDir::new().unwrap();
        let recipe_dir = init_recipe(dir.path(), "MyRecipe", &[]).unwrap();

        assert!(recipe_dir.join("recipe.yaml").exists());
        assert!(recipe_dir.join("values.yaml").exists());
        assert!(recipe_dir.join("sequences/myseq").exists());

        let (recipe, ok) = lint_recipe(&recipe_dir).unwrap();
        assert!(ok);
        assert_eq!(recipe.name, "myrecipe");
    }

    #[test]
    fn init_refuses_existing_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("taken")).unwrap();
        assert!(init_recipe(dir.path(), "taken", &[]).is_err());
    }

    #[test]
    fn select_hosts_matches_idents_groups_and_all() {
        let config: Config = serde_yaml::from_str(
            r#"
hosts:
  web1: {host: a, group: web}
  web2: {host: b, group: web}
  db1: {host: c, group: db}
"#,
        )
        .unwrap();

        let all = select_hosts(&config, &["all".to_string()]).unwrap();
        assert_eq!(all, vec!["web1", "web2", "db1"]);

        let web = select_hosts(&config, &["web".to_string()]).unwrap();
        assert_eq!(web, vec!["web1", "web2"]);

        let mixed = select_hosts(&config, &["db".to_string(), "web1".to_string()]).unwrap();
        assert_eq!(mixed, vec!["web1", "db1"]);

        assert!(select_hosts(&config, &[]).is_err());
        assert!(select_hosts(&config, &["nope".to_string()]).is_err());
    }

    #[test]
    fn run_sequence_errors_without_recipe() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            recipe_dir: dir.path().to_path_buf(),
            config_paths: vec![],
            values_paths: vec![],
            sequence: "deploy".to_string(),
            targets: vec!["all".to_string()],
            debug: false,
            json: false,
        };
        assert!(run_sequence(options).is_err());
    }

    #[test]
    fn run_sequence_executes_on_loopback_host() {
        let dir = TempDir::new().unwrap();
        valid_recipe(&dir);
        write(&dir, "config.yaml", "hosts:\n  local:\n    host: 127.0.0.1\n");
        write(&dir, "values.yaml", "greeting: hello\n");

        let options = RunOptions {
            recipe_dir: dir.path().to_path_buf(),
            config_paths: vec![],
            values_paths: vec![],
            sequence: "deploy".to_string(),
            targets: vec!["all".to_string()],
            debug: false,
            json: false,
        };

        let report = run_sequence(options).unwrap();
        assert!(report.ok());
        assert_eq!(report.success_hosts, vec!["local"]);
        assert_eq!(report.values["greeting"], "hello");
    }
}
