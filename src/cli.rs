//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{DEFAULT_CONF_DIR, DEFAULT_ROUTE_TABLE, Layout, RawInputs};

/// PostgreSQL authentication policy compiler for container start
#[derive(Parser, Debug)]
#[command(name = "postgres-autoconf")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory for rendered configuration and provisioned certificates
    #[arg(long, env = "AUTOCONF_CONF_DIR", default_value = DEFAULT_CONF_DIR, global = true)]
    pub conf_dir: PathBuf,

    /// Directory operators mount certificate files into
    #[arg(long, env = "AUTOCONF_MOUNT_DIR", default_value = DEFAULT_CONF_DIR, global = true)]
    pub mount_dir: PathBuf,

    /// Routing table used to detect LAN subnets when LAN_CIDRS is unset
    #[arg(long, env = "AUTOCONF_ROUTE_TABLE", default_value = DEFAULT_ROUTE_TABLE, global = true)]
    pub route_table: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTOCONF_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTOCONF_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Policy inputs
    #[command(flatten)]
    pub inputs: RawInputs,

    /// Subcommand (optional - defaults to apply)
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Filesystem layout selected on the command line.
    #[must_use]
    pub fn layout(&self) -> Layout {
        Layout::new(&self.conf_dir, &self.mount_dir).with_route_table(&self.route_table)
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Provision certificates and render every configuration file (default)
    Apply,

    /// Resolve and compile without writing; print pg_hba.conf to stdout
    Check,
}
