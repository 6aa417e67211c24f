#![doc = include_str!("../README.md")]

extern crate alloc;

use alloc::fmt;
use core::str::FromStr;
use std::io;

use serde::Deserialize;

/// Representation of a target architecture, named after the Debian ports
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub enum Architecture {
    /// ARM's AARCH32 Architecture, hard-float ABI
    Armhf,

    /// ARM's AARCH32 Architecture, soft-float ABI
    Armel,

    /// ARM's AARCH64 Architecture
    Arm64,

    /// Intel's x86 Architecture
    I386,

    /// Intel's X86-64 Architecture
    Amd64,
}

impl Architecture {
    /// Returns the Debian architecture name
    #[must_use]
    pub fn as_debian_str(self) -> &'static str {
        match self {
            Self::Armhf => "armhf",
            Self::Armel => "armel",
            Self::Arm64 => "arm64",
            Self::I386 => "i386",
            Self::Amd64 => "amd64",
        }
    }

    /// Returns the architecture name `mkimage -A` expects
    #[must_use]
    pub fn as_mkimage_str(self) -> &'static str {
        match self {
            Self::Armhf | Self::Armel => "arm",
            Self::Arm64 => "arm64",
            Self::I386 => "x86",
            Self::Amd64 => "x86_64",
        }
    }
}

impl FromStr for Architecture {
    type Err = FwBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "armhf" => Self::Armhf,
            "armel" => Self::Armel,
            "arm64" | "aarch64" => Self::Arm64,
            "i386" => Self::I386,
            "amd64" | "x86_64" => Self::Amd64,
            _ => {
                return Err(FwBuilderError::Config(format!(
                    "Unknown architecture: {s}"
                )))
            }
        })
    }
}

impl TryFrom<String> for Architecture {
    type Error = FwBuilderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_debian_str())
    }
}

/// Our Error Type
#[derive(thiserror::Error, Debug)]
pub enum FwBuilderError {
    /// The configuration is missing a key, or one of its values is invalid
    #[error("Configuration Error: {0}")]
    Config(String),

    /// An external tool exited with a failure status
    #[error("{program} failed (exit code {code:?}): {stderr}")]
    ToolFailure {
        /// Name of the program that failed
        program: String,

        /// Its exit code, if it wasn't killed by a signal
        code: Option<i32>,

        /// What it printed on its standard error
        stderr: String,
    },

    /// A path is a file where a directory is expected, or the other way around
    #[error("Filesystem State Error: {0}")]
    FilesystemState(String),

    /// An operation was attempted at the wrong stage of the build
    #[error("Invalid State: {0}")]
    InvalidState(String),

    /// An error has occurred when accessing the local filesystem or files
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// An error has occurred when parsing YAML configuration files
    #[error("Configuration File Format Error")]
    Yaml(#[from] serde_yaml::Error),
}
