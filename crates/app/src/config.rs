//! Server configuration: `config.ini` plus positional CLI overrides.
//!
//! The file format is line-oriented `KEY VALUE` pairs. Unknown keys are
//! ignored so deployments can carry extra annotations without breaking the
//! server.

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use infer_core::InferenceParams;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

const USAGE: &str = "Usage: facestream [<address> <port> <working_dir> <threads>]\n\
Example:\n    facestream 0.0.0.0 8080 ../../data/ultraface/ 16\n\
With no arguments the server reads config.ini from the current directory.";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
    /// Base directory frame-source paths are resolved against.
    pub working_dir: PathBuf,
    /// HTTP worker threads, at least 1.
    pub threads: usize,
    /// Target interval between emitted frames.
    pub frame_pause: Duration,
    pub inference: InferenceParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            working_dir: PathBuf::from("../../data/ultraface/"),
            threads: 16,
            frame_pause: Duration::from_millis(35),
            inference: InferenceParams::default(),
        }
    }
}

impl ServerConfig {
    /// Resolve the effective configuration from the CLI form: either no
    /// positionals (config.ini only) or exactly four overriding the listen
    /// endpoint, working directory, and thread count.
    pub fn resolve(overrides: &[String]) -> Result<Self> {
        let mut config = match fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Ok(contents) => Self::parse(&contents)
                .with_context(|| format!("invalid {DEFAULT_CONFIG_FILE}"))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("no {DEFAULT_CONFIG_FILE} in the working directory; using defaults");
                Self::default()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {DEFAULT_CONFIG_FILE}"))
            }
        };
        config.apply_overrides(overrides)?;
        Ok(config)
    }

    /// Apply the positional CLI form on top of the file configuration.
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        match overrides.len() {
            0 => Ok(()),
            4 => {
                self.address = overrides[0]
                    .parse()
                    .with_context(|| format!("invalid listen address {:?}", overrides[0]))?;
                self.port = overrides[1]
                    .parse()
                    .with_context(|| format!("invalid port {:?}", overrides[1]))?;
                self.working_dir = PathBuf::from(&overrides[2]);
                let threads: i64 = overrides[3]
                    .parse()
                    .with_context(|| format!("invalid thread count {:?}", overrides[3]))?;
                self.threads = threads.max(1) as usize;
                Ok(())
            }
            _ => bail!(USAGE),
        }
    }

    /// Parse the line-oriented `KEY VALUE` format.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config = Self::default();

        for (index, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_no = index + 1;
            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                bail!("line {line_no}: {line:?} has no value");
            };
            let value = value.trim();

            match key {
                "ADDRESS" => {
                    config.address = value
                        .parse()
                        .with_context(|| format!("line {line_no}: invalid ADDRESS {value:?}"))?;
                }
                "PORT" => {
                    config.port = value
                        .parse()
                        .with_context(|| format!("line {line_no}: invalid PORT {value:?}"))?;
                }
                "WORKING_DIR" => config.working_dir = PathBuf::from(value),
                "THREADS" => {
                    let threads: i64 = value
                        .parse()
                        .with_context(|| format!("line {line_no}: invalid THREADS {value:?}"))?;
                    config.threads = threads.max(1) as usize;
                }
                "DATA_DIR" => config.inference.data_dirs = vec![PathBuf::from(value)],
                "ONNX_FILE_NAME" => config.inference.onnx_file_name = value.to_string(),
                "INPUT_TENSORS" => {
                    config.inference.input_tensor_names =
                        value.split_whitespace().map(str::to_string).collect();
                }
                "OUTPUT_TENSORS" => {
                    config.inference.output_tensor_names =
                        value.split_whitespace().map(str::to_string).collect();
                }
                "PREPROCESSING_MEANS" => {
                    let means: Vec<f32> = value
                        .split_whitespace()
                        .map(str::parse)
                        .collect::<Result<_, _>>()
                        .with_context(|| {
                            format!("line {line_no}: invalid PREPROCESSING_MEANS {value:?}")
                        })?;
                    ensure!(
                        means.len() == 3,
                        "line {line_no}: PREPROCESSING_MEANS needs three values, got {}",
                        means.len()
                    );
                    config.inference.preprocessing_means = [means[0], means[1], means[2]];
                }
                "PREPROCESSING_NORM" => {
                    config.inference.preprocessing_norm = value.parse().with_context(|| {
                        format!("line {line_no}: invalid PREPROCESSING_NORM {value:?}")
                    })?;
                }
                "DETECTION_THRESHOLD" => {
                    config.inference.detection_threshold = value.parse().with_context(|| {
                        format!("line {line_no}: invalid DETECTION_THRESHOLD {value:?}")
                    })?;
                }
                "NUM_CLASSES" => {
                    config.inference.num_classes = value.parse().with_context(|| {
                        format!("line {line_no}: invalid NUM_CLASSES {value:?}")
                    })?;
                }
                "DETECTION_CLASS" => {
                    config.inference.detection_class = value.parse().with_context(|| {
                        format!("line {line_no}: invalid DETECTION_CLASS {value:?}")
                    })?;
                }
                "FRAME_PAUSE" => {
                    let millis: u64 = value.parse().with_context(|| {
                        format!("line {line_no}: invalid FRAME_PAUSE {value:?}")
                    })?;
                    config.frame_pause = Duration::from_millis(millis);
                }
                other => debug!(key = other, "ignoring unknown config key"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let inference = &self.inference;
        ensure!(
            inference.detection_threshold > 0.0 && inference.detection_threshold < 1.0,
            "DETECTION_THRESHOLD must be in (0, 1), got {}",
            inference.detection_threshold
        );
        ensure!(
            inference.num_classes >= 2,
            "NUM_CLASSES must be at least 2, got {}",
            inference.num_classes
        );
        ensure!(
            inference.detection_class < inference.num_classes,
            "DETECTION_CLASS {} is out of range for {} classes",
            inference.detection_class,
            inference.num_classes
        );
        ensure!(
            !inference.input_tensor_names.is_empty(),
            "INPUT_TENSORS must name at least one tensor"
        );
        ensure!(
            inference.output_tensor_names.len() >= 2,
            "OUTPUT_TENSORS must name the score and box tensors"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_no_config_profile() {
        let config = ServerConfig::default();
        assert_eq!(config.address, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.working_dir, PathBuf::from("../../data/ultraface/"));
        assert_eq!(config.threads, 16);
    }

    #[test]
    fn parses_every_recognized_key() {
        let config = ServerConfig::parse(
            "ADDRESS 127.0.0.1\n\
             PORT 9000\n\
             WORKING_DIR /srv/frames\n\
             THREADS 4\n\
             DATA_DIR /srv/models\n\
             ONNX_FILE_NAME face.onnx\n\
             INPUT_TENSORS input\n\
             OUTPUT_TENSORS scores boxes aux0 aux1\n\
             PREPROCESSING_MEANS 127 127 127\n\
             PREPROCESSING_NORM 128\n\
             DETECTION_THRESHOLD 0.8\n\
             NUM_CLASSES 2\n\
             DETECTION_CLASS 1\n\
             FRAME_PAUSE 50\n",
        )
        .unwrap();

        assert_eq!(config.address, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.working_dir, PathBuf::from("/srv/frames"));
        assert_eq!(config.threads, 4);
        assert_eq!(config.inference.data_dirs, vec![PathBuf::from("/srv/models")]);
        assert_eq!(config.inference.onnx_file_name, "face.onnx");
        assert_eq!(
            config.inference.output_tensor_names,
            vec!["scores", "boxes", "aux0", "aux1"]
        );
        assert_eq!(config.inference.detection_threshold, 0.8);
        assert_eq!(config.frame_pause, Duration::from_millis(50));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = ServerConfig::parse("FROBNICATE yes\nPORT 9000\n").unwrap();
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn cli_overrides_win_over_file_values() {
        let mut config = ServerConfig::parse("THREADS 2\n").unwrap();
        assert_eq!(config.threads, 2);

        let overrides: Vec<String> = ["0.0.0.0", "8080", "/srv/frames", "8"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.working_dir, PathBuf::from("/srv/frames"));
    }

    #[test]
    fn thread_override_clamps_to_one() {
        let mut config = ServerConfig::default();
        let overrides: Vec<String> = ["0.0.0.0", "8080", "/srv", "0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn wrong_positional_count_is_an_error() {
        let mut config = ServerConfig::default();
        let overrides: Vec<String> = vec!["0.0.0.0".into(), "8080".into()];
        assert!(config.apply_overrides(&overrides).is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        assert!(ServerConfig::parse("DETECTION_THRESHOLD 1.5\n").is_err());
    }

    #[test]
    fn detection_class_must_fit_class_count() {
        assert!(ServerConfig::parse("NUM_CLASSES 2\nDETECTION_CLASS 2\n").is_err());
        assert!(ServerConfig::parse("DETECTION_CLASS 1\nNUM_CLASSES 2\n").is_ok());
    }
}
