//! Effective configuration view (`shipyard config`).

use anyhow::Result;
use std::path::Path;

use shipyard::config::HostingConfig;

pub fn cmd_config(config_path: &Path) -> Result<()> {
    let config = HostingConfig::load(config_path)?;

    if config_path.exists() {
        println!("# Config file: {}", config_path.display());
    } else {
        println!(
            "# No config file at {}; showing defaults",
            config_path.display()
        );
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
