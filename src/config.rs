use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use diffodom_encoder::{Polarity, WrapBounds};
use diffodom_kinematics::DifferentialDrive;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::SetupError;
use crate::hardware::{ChannelHandle, Side};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "DIFFODOM";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub odometry: OdometrySettings,
    pub encoder: EncoderSettings,
    pub bus: BusSettings,
    pub frames: FrameSettings,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OdometrySettings {
    pub rate_hz: f64,
    pub ticks_per_meter: f64,
    pub base_width: f64,
}

impl Default for OdometrySettings {
    fn default() -> Self {
        OdometrySettings {
            rate_hz: 100.0,
            ticks_per_meter: 1000.0,
            base_width: 0.245,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub min: i64,
    pub max: i64,
    /// Defaults to the middle of `[min, max]`.
    pub low_wrap: Option<i64>,
    /// Defaults to the middle of `[min, max]`.
    pub high_wrap: Option<i64>,
    pub offset: i64,
    pub left_sign: i64,
    pub right_sign: i64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        EncoderSettings {
            min: -4_294_964_113,
            max: 4_294_964_113,
            low_wrap: None,
            high_wrap: None,
            offset: 16_777_216,
            left_sign: 1,
            right_sign: -1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub device: u8,
    pub left_chip_select: u8,
    pub right_chip_select: u8,
}

impl Default for BusSettings {
    fn default() -> Self {
        BusSettings {
            device: 0,
            left_chip_select: 0,
            right_chip_select: 1,
        }
    }
}

/// Coordinate frame names stamped on the output records.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    /// Fixed frame of the odometry record.
    pub odom_frame: String,
    /// Moving frame attached to the robot body.
    pub base_frame: String,
    /// Fixed frame the transform broadcast is expressed from.
    pub transform_parent_frame: String,
}

impl Default for FrameSettings {
    fn default() -> Self {
        FrameSettings {
            odom_frame: "odom".into(),
            base_frame: "robot_tf".into(),
            transform_parent_frame: "map".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub left_ticks_per_second: f64,
    pub right_ticks_per_second: f64,
    pub jitter_ticks: i64,
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            left_ticks_per_second: 150.0,
            right_ticks_per_second: 165.0,
            jitter_ticks: 0,
            seed: 7,
        }
    }
}

/// Validated startup parameters.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub rate_hz: f64,
    pub period: Duration,
    pub drive: DifferentialDrive,
    pub bounds: WrapBounds,
    pub offset: i64,
    pub left_polarity: Polarity,
    pub right_polarity: Polarity,
    pub left_handle: ChannelHandle,
    pub right_handle: ChannelHandle,
    pub frames: FrameSettings,
    pub simulation: SimulationSettings,
}

impl Settings {
    /// Checks every parameter and builds the domain objects from them.
    pub fn validate(&self) -> Result<NodeConfig, SetupError> {
        let rate_hz = self.odometry.rate_hz;
        if !(rate_hz > 0.0 && rate_hz.is_finite()) {
            return Err(SetupError::InvalidRate(rate_hz));
        }
        let period = Duration::try_from_secs_f64(1.0 / rate_hz)
            .ok()
            .filter(|p| !p.is_zero())
            .ok_or(SetupError::InvalidRate(rate_hz))?;

        let drive = DifferentialDrive::new(self.odometry.ticks_per_meter, self.odometry.base_width)?;

        let enc = &self.encoder;
        let mid = WrapBounds::midpoint(enc.min, enc.max);
        let bounds = WrapBounds::new(
            enc.min,
            enc.max,
            enc.low_wrap.unwrap_or(mid),
            enc.high_wrap.unwrap_or(mid),
        )?;

        let sim = &self.simulation;
        if !(sim.left_ticks_per_second.is_finite() && sim.right_ticks_per_second.is_finite()) {
            return Err(SetupError::InvalidSimulation("tick rates must be finite"));
        }
        if sim.jitter_ticks < 0 || sim.jitter_ticks as f64 >= bounds.span() / 4.0 {
            return Err(SetupError::InvalidSimulation(
                "jitter must be non-negative and below a quarter of the counter range",
            ));
        }

        let polarity = |side: Side, sign: i64| {
            Polarity::from_sign(sign).ok_or(SetupError::InvalidPolarity { side, sign })
        };

        Ok(NodeConfig {
            rate_hz,
            period,
            drive,
            bounds,
            offset: enc.offset,
            left_polarity: polarity(Side::Left, enc.left_sign)?,
            right_polarity: polarity(Side::Right, enc.right_sign)?,
            left_handle: ChannelHandle::new(self.bus.device, self.bus.left_chip_select),
            right_handle: ChannelHandle::new(self.bus.device, self.bus.right_chip_select),
            frames: self.frames.clone(),
            simulation: self.simulation.clone(),
        })
    }
}

/// Loads settings from a TOML file, overridden by `DIFFODOM_*` environment
/// variables (`__` separates sections, e.g. `DIFFODOM_ODOMETRY__RATE_HZ`).
pub fn load_settings(path: &str) -> Result<Settings, SetupError> {
    info!("Attempting to load configuration from {}", path);

    let builder = Config::builder()
        .add_source(File::new(path, FileFormat::Toml).required(true))
        .add_source(environment());

    match deserialize(builder) {
        Ok(settings) => {
            info!("Successfully loaded configuration: {:?}", settings);
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e.into())
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn deserialize(builder: ConfigBuilder<DefaultState>) -> Result<Settings, config::ConfigError> {
    builder.build()?.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffodom_encoder::EncoderError;
    use diffodom_kinematics::KinematicsError;

    fn from_toml(toml: &str) -> Settings {
        deserialize(Config::builder().add_source(File::from_str(toml, FileFormat::Toml))).unwrap()
    }

    #[test]
    fn test_defaults_match_reference_robot() {
        let node = from_toml("").validate().unwrap();

        assert_eq!(node.rate_hz, 100.0);
        assert_eq!(node.period, Duration::from_millis(10));
        assert_eq!(node.drive.ticks_per_meter(), 1000.0);
        assert_eq!(node.drive.base_width(), 0.245);
        assert_eq!(node.bounds.low_wrap(), 0);
        assert_eq!(node.bounds.high_wrap(), 0);
        assert_eq!(node.offset, 16_777_216);
        assert_eq!(node.left_polarity, Polarity::Normal);
        assert_eq!(node.right_polarity, Polarity::Inverted);
        assert_eq!(node.left_handle, ChannelHandle::new(0, 0));
        assert_eq!(node.right_handle, ChannelHandle::new(0, 1));
        assert_eq!(node.frames, FrameSettings::default());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let settings = from_toml(
            r#"
            [odometry]
            rate_hz = 50.0

            [encoder]
            min = 0
            max = 65536
            low_wrap = 19660

            [frames]
            base_frame = "base_link"
            "#,
        );
        let node = settings.validate().unwrap();

        assert_eq!(node.period, Duration::from_millis(20));
        assert_eq!(node.drive.base_width(), 0.245);
        assert_eq!(node.bounds.low_wrap(), 19_660);
        assert_eq!(node.bounds.high_wrap(), 32_768);
        assert_eq!(node.frames.base_frame, "base_link");
        assert_eq!(node.frames.odom_frame, "odom");
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let settings = from_toml(include_str!("../config/default.toml"));
        let node = settings.validate().unwrap();
        assert!(node.bounds.low_wrap() < 0);
        assert!(node.bounds.high_wrap() > 0);
    }

    #[test]
    fn test_rejects_bad_rate() {
        for rate in [0.0, -100.0, f64::INFINITY, f64::NAN, 1e-320] {
            let mut settings = Settings::default();
            settings.odometry.rate_hz = rate;
            assert!(
                matches!(settings.validate(), Err(SetupError::InvalidRate(_))),
                "rate {} accepted",
                rate
            );
        }
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut settings = Settings::default();
        settings.odometry.ticks_per_meter = 0.0;
        assert!(matches!(
            settings.validate(),
            Err(SetupError::Kinematics(KinematicsError::InvalidTicksPerMeter(_)))
        ));

        let mut settings = Settings::default();
        settings.odometry.base_width = -0.2;
        assert!(matches!(
            settings.validate(),
            Err(SetupError::Kinematics(KinematicsError::InvalidBaseWidth(_)))
        ));
    }

    #[test]
    fn test_rejects_bad_bounds() {
        let mut settings = Settings::default();
        settings.encoder.low_wrap = Some(10);
        settings.encoder.high_wrap = Some(-10);
        assert!(matches!(
            settings.validate(),
            Err(SetupError::Encoder(EncoderError::InvalidBounds(_)))
        ));

        let mut settings = Settings::default();
        settings.encoder.max = settings.encoder.min;
        assert!(matches!(settings.validate(), Err(SetupError::Encoder(_))));
    }

    #[test]
    fn test_rejects_bad_sign() {
        let mut settings = Settings::default();
        settings.encoder.right_sign = 0;
        assert!(matches!(
            settings.validate(),
            Err(SetupError::InvalidPolarity { side: Side::Right, sign: 0 })
        ));
    }

    #[test]
    fn test_rejects_bad_simulation() {
        let mut settings = Settings::default();
        settings.simulation.left_ticks_per_second = f64::INFINITY;
        assert!(matches!(settings.validate(), Err(SetupError::InvalidSimulation(_))));

        for jitter in [-1, i64::MIN, i64::MAX] {
            let mut settings = Settings::default();
            settings.simulation.jitter_ticks = jitter;
            assert!(
                matches!(settings.validate(), Err(SetupError::InvalidSimulation(_))),
                "jitter {} accepted",
                jitter
            );
        }

        let mut settings = Settings::default();
        settings.simulation.jitter_ticks = 3;
        settings.simulation.right_ticks_per_second = -165.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_file() {
        let vars: config::Map<String, String> = [
            ("DIFFODOM_ODOMETRY__RATE_HZ", "50"),
            ("DIFFODOM_FRAMES__BASE_FRAME", "base_link"),
            ("OTHER_ODOMETRY__RATE_HZ", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let builder = Config::builder()
            .add_source(File::from_str(
                "[odometry]\nrate_hz = 20.0\nbase_width = 0.3\n",
                FileFormat::Toml,
            ))
            .add_source(environment().source(Some(vars)));
        let node = deserialize(builder).unwrap().validate().unwrap();

        assert_eq!(node.period, Duration::from_millis(20));
        assert_eq!(node.drive.base_width(), 0.3);
        assert_eq!(node.frames.base_frame, "base_link");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_settings("config/does-not-exist.toml");
        assert!(matches!(result, Err(SetupError::Load(_))));
    }
}
