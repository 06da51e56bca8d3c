use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ControlPlaneConfig;

/// Load configuration from a file using the config crate.
///
/// Relative document paths are resolved against the configuration file's directory.
pub async fn load_config(config_path: &str) -> Result<ControlPlaneConfig> {
    load_config_sync(config_path)
}

pub fn load_config_sync(config_path: &str) -> Result<ControlPlaneConfig> {
    let mut config = read_config_file(config_path)?;
    let base = Path::new(config_path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    resolve_paths(&mut config, &base);
    Ok(config)
}

fn read_config_file(config_path: &str) -> Result<ControlPlaneConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })
}

fn resolve(base: &Path, path: &str) -> String {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() || base.as_os_str().is_empty() {
        return path.to_string();
    }
    base.join(candidate).to_string_lossy().into_owned()
}

fn resolve_paths(config: &mut ControlPlaneConfig, base: &Path) {
    for fleet in &mut config.fleets {
        for api in &mut fleet.apis {
            api.spec_path = resolve(base, &api.spec_path);
        }
        for path in &mut fleet.static_routes {
            *path = resolve(base, path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
distribution_addr: "127.0.0.1:18010"
fanout_send_timeout: 2s
logging:
  json: true
fleets:
  - id: default
    apis:
      - name: todos
        spec_path: todos.yaml
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.distribution_addr, "127.0.0.1:18010");
        assert!(config.logging.json);

        let spec_path = Path::new(&config.fleets[0].apis[0].spec_path);
        assert!(spec_path.is_absolute());
        assert_eq!(spec_path.parent(), temp_file.path().parent());
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "fleets": [
    { "id": "edge", "static_routes": ["/etc/kusk/static.yaml"] }
  ],
  "agent": { "manager_url": "http://manager:18010" }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.fleets[0].static_routes, vec!["/etc/kusk/static.yaml"]);
        let agent = config.agent.unwrap();
        assert_eq!(agent.listen_addr, "127.0.0.1:8090");
        assert_eq!(agent.fleet_id, "default");
    }
}
