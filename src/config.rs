// config.rs — viewer configuration
//
// Resolution order:
// - --config <file>: JSON with any of the fields below
// - CLI flags: --records <file>, --depth-resolution <px>, --scene-size <m>, --export <file>
// - Env: PROJECTOR_RECORDS
// - Search: <exe_dir>/assets/records.json, then ./assets/records.json
// - Built-in defaults

use crate::depth::DEFAULT_RESOLUTION;
use crate::error::{ConfigError, RecordError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ViewerConfig {
    /// Projection records to load at startup.
    pub records: Option<PathBuf>,
    /// Edge length of every depth map.
    pub depth_resolution: u32,
    /// Side of the generated demo district, in metres.
    pub scene_size: f32,
    /// Where KeyC writes the live records.
    pub export: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            records: None,
            depth_resolution: DEFAULT_RESOLUTION,
            scene_size: 400.0,
            export: PathBuf::from("records-export.json"),
        }
    }
}

/// Find assets/<name> by searching:
/// 1) <exe_dir>/assets/<name>
/// 2) ./assets/<name>  (dev working dir)
pub fn find_asset(name: &str) -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join("assets").join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    let p = PathBuf::from("assets").join(name);
    if p.exists() {
        return Some(p);
    }

    None
}

fn load_file(path: &Path) -> Result<ViewerConfig, ConfigError> {
    let wrap = |source: RecordError| ConfigError::File {
        path: path.to_path_buf(),
        source,
    };
    let text = std::fs::read_to_string(path).map_err(|source| {
        wrap(RecordError::Io {
            path: path.to_path_buf(),
            source,
        })
    })?;
    serde_json::from_str(&text).map_err(|e| wrap(RecordError::Json(e)))
}

fn parse_flag<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

impl ViewerConfig {
    /// From the process arguments and environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(std::env::args().skip(1), |key| std::env::var(key).ok())
    }

    pub fn resolve(
        args: impl IntoIterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let args: Vec<String> = args.into_iter().collect();

        let mut config = match args.iter().position(|a| a == "--config") {
            Some(i) => {
                let path: PathBuf = parse_flag("--config", args.get(i + 1).cloned())?;
                load_file(&path)?
            }
            None => ViewerConfig::default(),
        };

        let mut it = args.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "--config" => {
                    it.next();
                }
                "--records" => config.records = Some(parse_flag(&a, it.next())?),
                "--depth-resolution" => config.depth_resolution = parse_flag(&a, it.next())?,
                "--scene-size" => config.scene_size = parse_flag(&a, it.next())?,
                "--export" => config.export = parse_flag(&a, it.next())?,
                other => log::warn!("ignoring unknown argument {}", other),
            }
        }

        if config.records.is_none() {
            config.records = env("PROJECTOR_RECORDS")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or_else(|| find_asset("records.json"));
        }
        if config.depth_resolution == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "--depth-resolution".into(),
                value: "0".into(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_defaults() {
        let config = ViewerConfig::resolve(
            args(&["--records", "city.json", "--depth-resolution", "1024"]),
            |_| None,
        )
        .unwrap();
        assert_eq!(config.records, Some(PathBuf::from("city.json")));
        assert_eq!(config.depth_resolution, 1024);
        assert_eq!(config.scene_size, 400.0);
    }

    #[test]
    fn env_supplies_records_when_no_flag() {
        let config = ViewerConfig::resolve(args(&[]), |k| (k == "PROJECTOR_RECORDS").then(|| "env.json".to_string())).unwrap();
        assert_eq!(config.records, Some(PathBuf::from("env.json")));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = ViewerConfig::resolve(args(&["--depth-resolution", "lots"]), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let err = ViewerConfig::resolve(args(&["--scene-size"]), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue(_)));
    }

    #[test]
    fn config_file_is_read_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.json");
        std::fs::write(&path, r#"{ "depth-resolution": 256, "scene-size": 120 }"#).unwrap();
        let config = ViewerConfig::resolve(
            args(&["--config", path.to_str().unwrap(), "--scene-size", "90"]),
            |_| None,
        )
        .unwrap();
        assert_eq!(config.depth_resolution, 256);
        assert_eq!(config.scene_size, 90.0);
    }
}
