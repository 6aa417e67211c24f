#![doc = include_str!("../README.md")]
#![allow(missing_docs)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer};
use types::{Architecture, FwBuilderError};

#[derive(Deserialize)]
#[serde(untagged)]
enum Stringly {
    Int(i64),
    Str(String),
}

impl From<Stringly> for String {
    fn from(value: Stringly) -> Self {
        match value {
            Stringly::Int(v) => v.to_string(),
            Stringly::Str(v) => v,
        }
    }
}

fn deserialize_stringly<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Stringly::deserialize(deserializer)?.into())
}

fn deserialize_opt_stringly<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Stringly>::deserialize(deserializer)?.map(Into::into))
}

fn default_unit() -> String {
    String::from("mb")
}

fn default_label() -> String {
    String::from("msdos")
}

fn default_alignment() -> String {
    String::from("optimal")
}

fn default_fill_method() -> String {
    String::from("zero")
}

fn default_partition_type() -> String {
    String::from("primary")
}

fn default_true() -> bool {
    true
}

/// What gets copied into the image partitions
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// The assembled root filesystem, spread over the mapped partitions
    #[default]
    Rootfs,

    /// The firmware payload, copied once per enabled bank
    Firmware,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    pub image_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub rootfs_mountpoint: Option<PathBuf>,
    pub firmware_dir: Option<PathBuf>,
    pub bsp_dir: Option<PathBuf>,
    pub templates_dir: Option<PathBuf>,
}

impl Paths {
    /// Fills every path we don't have with the one from `defaults`
    #[must_use]
    pub fn or(self, defaults: Paths) -> Paths {
        Paths {
            image_dir: self.image_dir.or(defaults.image_dir),
            work_dir: self.work_dir.or(defaults.work_dir),
            rootfs_mountpoint: self.rootfs_mountpoint.or(defaults.rootfs_mountpoint),
            firmware_dir: self.firmware_dir.or(defaults.firmware_dir),
            bsp_dir: self.bsp_dir.or(defaults.bsp_dir),
            templates_dir: self.templates_dir.or(defaults.templates_dir),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallAction {
    pub source: Option<String>,

    #[serde(default)]
    pub options: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UBoot {
    #[serde(default)]
    pub installation: Vec<InstallAction>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bsp {
    pub uboot: Option<UBoot>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub board: String,
    pub arch: Architecture,
    pub bsp: Option<Bsp>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Partition {
    pub name: Option<String>,

    #[serde(rename = "type", default = "default_partition_type")]
    pub kind: String,

    #[serde(deserialize_with = "deserialize_stringly")]
    pub size: String,

    #[serde(default = "default_unit")]
    pub unit: String,

    #[serde(default, deserialize_with = "deserialize_opt_stringly")]
    pub start_sector: Option<String>,

    #[serde(default)]
    pub flags: Vec<String>,

    pub filesystem: Option<String>,

    #[serde(default = "default_true")]
    pub format: bool,

    pub ext_fs_tune: Option<String>,
    pub content_partition_mapping: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Devices {
    pub filename: String,

    #[serde(deserialize_with = "deserialize_stringly")]
    pub size: String,

    #[serde(default = "default_unit")]
    pub unit: String,

    #[serde(default = "default_label")]
    pub label: String,

    #[serde(default = "default_alignment")]
    pub alignment: String,

    #[serde(default = "default_fill_method")]
    pub fill_method: String,

    pub compression: Option<String>,
    pub compression_options: Option<String>,

    #[serde(default)]
    pub timestamp: bool,

    pub suffix: Option<String>,

    #[serde(default)]
    pub partitions: Vec<Partition>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bank {
    pub device_type: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_stringly")]
    pub device_number_uboot: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_stringly")]
    pub device_number_linux: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_stringly")]
    pub partition: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BankPartitions {
    pub bank_0: Option<Bank>,
    pub bank_1: Option<Bank>,
    pub rescue: Option<Bank>,
    pub update: Option<Bank>,
    pub failover: Option<Bank>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resilience {
    #[serde(default)]
    pub dual_banks: bool,

    #[serde(default)]
    pub rescue_image: bool,

    #[serde(default)]
    pub update_partition: bool,

    #[serde(default)]
    pub partitions: BankPartitions,
}

/// A project file, describing one image build
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    #[serde(deserialize_with = "deserialize_stringly")]
    pub version: String,

    #[serde(default)]
    pub content: ContentKind,

    #[serde(default)]
    pub generate_boot_script: bool,

    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub targets: Vec<Target>,

    pub devices: Devices,
    pub resilience: Option<Resilience>,
}

impl Project {
    /// Loads a project from a YAML file
    ///
    /// # Errors
    ///
    /// If the file can't be read or isn't a valid project description
    pub fn from_file(path: &Path) -> Result<Self, FwBuilderError> {
        let content = fs::read_to_string(path)?;

        Ok(serde_yaml::from_str(&content)?)
    }
}

/// The tool configuration file, shared by all projects
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    #[serde(default)]
    pub paths: Paths,
}

impl ToolConfig {
    /// Loads the tool configuration from a YAML file
    ///
    /// # Errors
    ///
    /// If the file can't be read or isn't a valid configuration
    pub fn from_file(path: &Path) -> Result<Self, FwBuilderError> {
        let content = fs::read_to_string(path)?;

        Ok(serde_yaml::from_str(&content)?)
    }
}
