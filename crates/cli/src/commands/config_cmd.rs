//! `snak config`: print the default configuration.

use snak_config::AppConfig;

pub fn show() {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", AppConfig::default_toml());
}
