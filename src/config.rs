use anyhow::{anyhow, Result};
use log::info;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Name of the per-user config file looked up in the home directory
pub const USER_CONFIG: &str = ".arbophyl.toml";

/// Locations and extra arguments of the external tools
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub busco: Tool,
    pub mafft: Tool,
    pub trimal: Tool,
    pub iqtree: IqTree,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Tool {
    /// Binary name on PATH or a full path
    pub binary: String,

    /// Extra arguments, the tool's defaults when empty or missing
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IqTree {
    pub binary: String,

    /// Arguments for model selection on each alignment
    pub model_args: Vec<String>,

    /// Arguments for the final partitioned tree
    pub tree_args: Vec<String>,
}

impl Default for IqTree {
    fn default() -> Self {
        IqTree {
            binary: "iqtree2".to_string(),
            model_args: vec!["-m".to_string(), "MFP".to_string()],
            tree_args: vec![],
        }
    }
}

impl Config {
    /// Read `path` if given, else the user config if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            _ => user_config(),
        };

        let config = match path {
            Some(path) => {
                info!(r#"Reading config "{}""#, path.display());
                let contents = fs::read_to_string(&path).map_err(|e| {
                    anyhow!("Cannot read {}: {e}", path.display())
                })?;
                Self::parse(&contents).map_err(|e| {
                    anyhow!("Invalid config {}: {e}", path.display())
                })?
            }
            _ => Self::parse("")?,
        };

        Ok(config)
    }

    /// Parse TOML, filling tools left out (or left blank) with defaults
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.busco.fill("busco", &[]);
        config.mafft.fill("mafft", &["--auto"]);
        config.trimal.fill("trimal", &["-automated1"]);
        if config.iqtree.binary.is_empty() {
            config.iqtree.binary = IqTree::default().binary;
        }
        Ok(config)
    }
}

impl Tool {
    /// Binary and args are defaulted separately, so a section naming only
    /// the binary keeps the default args
    fn fill(&mut self, binary: &str, args: &[&str]) {
        if self.binary.is_empty() {
            self.binary = binary.to_string();
        }
        if self.args.is_empty() {
            self.args = args.iter().map(|arg| arg.to_string()).collect();
        }
    }
}

// --------------------------------------------------
fn user_config() -> Option<PathBuf> {
    homedir::my_home()
        .ok()
        .flatten()
        .map(|home| home.join(USER_CONFIG))
        .filter(|path| path.is_file())
}
