use serde::{Deserialize, Serialize};

/// Corner selection parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, clap::Args)]
pub struct FeatureParams {
    /// Upper bound on selected corners, 0 disables the cap
    #[clap(long, default_value = "100")]
    pub max_corners: usize,

    /// Fraction of the strongest score below which candidates are dropped
    #[clap(long, default_value = "0.01")]
    pub quality_level: f64,

    /// Minimum distance between selected corners in pixels
    #[clap(long, default_value = "7")]
    pub min_distance: f64,

    /// Side of the window used to accumulate the gradient covariance
    #[clap(long, default_value = "7")]
    pub block_size: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.01,
            min_distance: 7.,
            block_size: 7,
        }
    }
}

/// Pyramidal Lucas-Kanade parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, clap::Args)]
pub struct FlowParams {
    /// Side of the square matching window, rounded up to an odd number
    #[clap(long, default_value = "15")]
    pub window_size: usize,

    /// Pyramid levels on top of the full resolution image
    #[clap(long, default_value = "2")]
    pub max_level: usize,

    #[clap(long, default_value = "10")]
    pub max_iterations: usize,

    /// Stop refining once the update step is shorter than this
    #[clap(long, default_value = "0.03")]
    pub epsilon: f64,

    /// Smallest accepted eigenvalue of the window gradient matrix,
    /// normalised by the window pixel count
    #[clap(long, default_value = "0.0001")]
    pub min_eigen_threshold: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            window_size: 15,
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
            min_eigen_threshold: 1e-4,
        }
    }
}

/// How the region follows the surviving points
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ArgEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecenterMode {
    /// Center the region on the mean position of the good points
    Centroid,
    /// Move the region center by the mean displacement of the good points.
    /// This is the default. Unlike `Centroid` it leaves the region in place
    /// on an unchanged frame even when the corners are not centered in it.
    Shift,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, clap::Args)]
pub struct TrackerConfig {
    #[clap(flatten)]
    pub features: FeatureParams,

    #[clap(flatten)]
    pub flow: FlowParams,

    /// Select new corners when fewer good points than this survive
    #[clap(long, default_value = "30")]
    pub replenish_threshold: usize,

    /// Inward padding of the replenishment mask, fraction of the region size
    #[clap(long, default_value = "0.1")]
    pub replenish_padding: f64,

    /// Points closer than this are merged after replenishment
    #[clap(long, default_value = "0.5")]
    pub merge_distance: f64,

    #[clap(long, arg_enum, default_value = "shift")]
    pub recenter: RecenterMode,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            features: FeatureParams::default(),
            flow: FlowParams::default(),
            replenish_threshold: 30,
            replenish_padding: 0.1,
            merge_distance: 0.5,
            recenter: RecenterMode::Shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Args {
        #[clap(flatten)]
        config: TrackerConfig,
    }

    #[test]
    fn test_cli_defaults_match_default() {
        let args = Args::parse_from(["tracker"]);
        assert_eq!(args.config, TrackerConfig::default());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "tracker",
            "--max-corners",
            "50",
            "--max-level",
            "3",
            "--recenter",
            "centroid",
        ]);
        assert_eq!(args.config.features.max_corners, 50);
        assert_eq!(args.config.flow.max_level, 3);
        assert_eq!(args.config.recenter, RecenterMode::Centroid);
    }

    #[test]
    fn test_json_roundtrip_keeps_mode_name() {
        let json = serde_json::to_string(&TrackerConfig::default()).unwrap();
        assert!(json.contains("\"recenter\":\"shift\""));
        let back: TrackerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TrackerConfig::default());
    }
}
