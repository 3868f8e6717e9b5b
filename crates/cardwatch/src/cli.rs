//! Command line arguments.

use std::path::PathBuf;

use anyhow::{bail, Context};

/// Parsed `cardwatch` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    /// YAML configuration file (`--config <file>`)
    pub config: Option<PathBuf>,
    /// YAML card contents for the simulated card (`--card <file>`)
    pub card: Option<PathBuf>,
}

impl Args {
    /// Parse the process arguments.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().context("--config requires a file path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--card" => {
                    let path = args.next().context("--card requires a file path")?;
                    parsed.card = Some(PathBuf::from(path));
                }
                other => bail!("unknown argument '{}'", other),
            }
        }

        Ok(parsed)
    }
}
