// SPDX-License-Identifier: GPL-3.0-only

//! Host and on-drive path layout
//!
//! Every directory the subsystem touches is resolved through a [`Layout`] so
//! that the whole tree can be relocated (tests, chroots, alternate installs).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an alternate configuration file
pub const CONFIG_ENV: &str = "ZENFS_CONFIG";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zenfs/zenfs.toml";

/// Marker file stored inside directory ghost entries
pub const FOLDER_MARKER: &str = ".zenfs-folder";

/// Per-drive locations, relative to the drive's mount point
pub const DRIVE_ZENFS_DIR: &str = "System/ZenFS";
pub const DRIVE_IDENTITY_FILE: &str = "System/ZenFS/drive.json";
pub const DRIVE_DATABASE_DIR: &str = "System/ZenFS/Database";
pub const DRIVE_USERS_DIR: &str = "Users";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Layout {
    pub zenfs_root: PathBuf,
    pub database: PathBuf,
    pub missing_root: PathBuf,
    pub ignore_file: PathBuf,
    pub system_uuid_file: PathBuf,
    pub config_map_file: PathBuf,
    pub lock_file: PathBuf,
    pub roaming_root: PathBuf,
    pub staging_root: PathBuf,
    pub mint_staging: PathBuf,
    pub primary_home: PathBuf,
    pub users_mount: PathBuf,
    pub config_root: PathBuf,
    pub dev_root: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self::rooted_at(Path::new("/"))
    }
}

impl Layout {
    /// Build the default layout underneath an arbitrary prefix.
    pub fn rooted_at(prefix: &Path) -> Self {
        let zenfs_root = prefix.join("System/ZenFS");
        Self {
            database: zenfs_root.join("Database"),
            missing_root: zenfs_root.join("MissingDrives"),
            ignore_file: zenfs_root.join("ignore_list.json"),
            system_uuid_file: zenfs_root.join("system_uuid"),
            config_map_file: zenfs_root.join("config_categories.json"),
            lock_file: zenfs_root.join("index.lock"),
            zenfs_root,
            roaming_root: prefix.join("Mount/Roaming"),
            staging_root: prefix.join("Live/Temp"),
            mint_staging: prefix.join("tmp/zenfs_mint"),
            primary_home: prefix.join("home"),
            users_mount: prefix.join("Users"),
            config_root: prefix.join("Config"),
            dev_root: prefix.join("dev"),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("invalid ZenFS layout configuration")
    }

    /// Load the layout from `path`, `$ZENFS_CONFIG`, or the default location.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                Self::from_toml_str(&content).with_context(|| format!("reading {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// `<roaming_root>/<uuid>`
    pub fn roaming_mount(&self, uuid: &str) -> PathBuf {
        self.roaming_root.join(uuid)
    }

    /// `<database>/<user>/<rel>`
    pub fn system_entry(&self, user: &str, rel: &Path) -> PathBuf {
        join_rel(&self.database.join(user), rel)
    }

    /// `<missing_root>/<uuid>/<user>/<rel>`
    pub fn missing_placeholder(&self, uuid: &str, user: &str, rel: &Path) -> PathBuf {
        join_rel(&self.missing_root.join(uuid).join(user), rel)
    }

    /// `<primary_home>/<user>`
    pub fn real_home(&self, user: &str) -> PathBuf {
        self.primary_home.join(user)
    }

    /// `<staging_root>/<machine id>/<device name>`
    pub fn staging_mount(&self, machine_id: &str, device_name: &str) -> PathBuf {
        self.staging_root.join(machine_id).join(device_name)
    }
}

/// Locations on a drive mounted at some root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrivePaths {
    root: PathBuf,
}

impl DrivePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zenfs_dir(&self) -> PathBuf {
        self.root.join(DRIVE_ZENFS_DIR)
    }

    pub fn identity_file(&self) -> PathBuf {
        self.root.join(DRIVE_IDENTITY_FILE)
    }

    pub fn database(&self) -> PathBuf {
        self.root.join(DRIVE_DATABASE_DIR)
    }

    pub fn users(&self) -> PathBuf {
        self.root.join(DRIVE_USERS_DIR)
    }

    /// `<root>/System/ZenFS/Database/<user>/<rel>`
    pub fn ghost_entry(&self, user: &str, rel: &Path) -> PathBuf {
        join_rel(&self.database().join(user), rel)
    }

    /// `<root>/Users/<user>/<rel>`
    pub fn user_file(&self, user: &str, rel: &Path) -> PathBuf {
        join_rel(&self.users().join(user), rel)
    }
}

fn join_rel(base: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    }
}
