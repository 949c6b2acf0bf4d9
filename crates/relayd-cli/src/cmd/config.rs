use anyhow::Result;
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Print the effective configuration as YAML
    Show,
    /// Check the configuration for errors
    Validate,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(path: Option<&Path>, subcommand: ConfigSubcommand) -> Result<()> {
    let config = super::load_config(path)?;
    match subcommand {
        ConfigSubcommand::Show => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        ConfigSubcommand::Validate => {
            config.validate()?;
            println!(
                "configuration OK: {} relay(s), listen {}",
                config.relays.len(),
                config.listen
            );
            Ok(())
        }
    }
}
