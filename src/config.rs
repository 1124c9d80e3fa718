use clap::Parser;
use std::path::PathBuf;

use crate::preprocess::Normalization;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "5001")]
    pub port: u16,

    /// Path to the model checkpoint (safetensors or PyTorch state dict)
    #[arg(
        long,
        env = "MODEL_PATH",
        default_value = "model/plant_disease_model.safetensors"
    )]
    pub model_path: PathBuf,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Apply ImageNet per-channel mean/std normalization instead of plain
    /// [0, 1] scaling. Must match how the deployed checkpoint was trained.
    #[arg(long, env = "IMAGENET_NORMALIZE")]
    pub imagenet_normalize: bool,
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn normalization(&self) -> Normalization {
        if self.imagenet_normalize {
            Normalization::ImageNet
        } else {
            Normalization::Scale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["leafcheck"]);
        assert_eq!(config.server_address(), "0.0.0.0:5001");
        assert_eq!(config.normalization(), Normalization::Scale);
        assert!(!config.cpu_only);
    }

    #[test]
    fn test_normalization_flag() {
        let config = Config::parse_from(["leafcheck", "--imagenet-normalize"]);
        assert_eq!(config.normalization(), Normalization::ImageNet);
    }
}
