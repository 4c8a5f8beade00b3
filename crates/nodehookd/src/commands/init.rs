use anyhow::Result;
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# nodehook configuration

[engine]
# node_name = "node01"    # defaults to $HOSTNAME
default_alarm_secs = 30
timeout_policy = "reject" # or "continue"
kill_grace_ms = 2000
shutdown_grace_secs = 10
host_periodic_secs = 120
log_capacity = 1024

[store]
path = "./nodehook.redb"

[hooks]
# manifest = "./hooks.toml"
watch = true
"#;

/// Initialize a new config file
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {:?}", path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("Created config at {:?}", path);
    Ok(())
}
