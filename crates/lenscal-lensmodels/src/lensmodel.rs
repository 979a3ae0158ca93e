//! Lens model registry.
//!
//! A [`LensModel`] is a closed sum type: the payload of each variant is the
//! model configuration, so a model without its configuration (or with a
//! configuration of the wrong shape) cannot be built. Models are named by
//! strings such as `LENSMODEL_OPENCV8` or
//! `LENSMODEL_SPLINED_STEREOGRAPHIC_order=3_Nx=16_Ny=14_fov_x_deg=200`.

use std::fmt;

use crate::{LensModelError, LensModelResult};

const NAME_PREFIX: &str = "LENSMODEL_";

/// Configuration of [`LensModel::Cahvore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CahvoreConfig {
    pub linearity: f64,
}

/// Configuration of [`LensModel::SplinedStereographic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplinedStereographicConfig {
    /// 2 (quadratic) or 3 (cubic)
    pub order: u16,
    pub nx: u16,
    pub ny: u16,
    /// Horizontal field of view covered by the knot grid
    pub fov_x_deg: u16,
}

impl SplinedStereographicConfig {
    pub fn new(order: u16, nx: u16, ny: u16, fov_x_deg: u16) -> Self {
        Self {
            order,
            nx,
            ny,
            fov_x_deg,
        }
    }

    /// Checks the ranges a spline surface needs to be evaluated.
    pub fn validate(&self) -> Result<(), String> {
        if self.order != 2 && self.order != 3 {
            return Err(format!("order must be 2 or 3, got {}", self.order));
        }
        let min_n = self.order + 1;
        if self.nx < min_n || self.ny < min_n {
            return Err(format!(
                "Nx and Ny must be at least {min_n} for order {}, got Nx={} Ny={}",
                self.order, self.nx, self.ny
            ));
        }
        if self.fov_x_deg == 0 || self.fov_x_deg >= 360 {
            return Err(format!(
                "fov_x_deg must be in (0, 360), got {}",
                self.fov_x_deg
            ));
        }
        Ok(())
    }

    /// Stereographic |u| at the horizontal edge of the field of view.
    pub fn u_edge(&self) -> f64 {
        2.0 * (f64::from(self.fov_x_deg).to_radians() / 4.0).tan()
    }

    /// Knot segments per unit of stereographic u.
    ///
    /// The outermost `order - 1` segments are kept as margin so the field of
    /// view edge still has full spline support.
    pub fn segments_per_u(&self) -> f64 {
        let margin = f64::from(self.order - 1);
        (f64::from(self.nx) - 1.0 - margin) / (2.0 * self.u_edge())
    }

    pub fn num_knots(&self) -> usize {
        usize::from(self.nx) * usize::from(self.ny)
    }
}

/// Type tag of a lens model, without configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LensModelType {
    Pinhole,
    Stereographic,
    Lonlat,
    Latlon,
    Opencv4,
    Opencv5,
    Opencv8,
    Opencv12,
    Cahvor,
    Cahvore,
    SplinedStereographic,
}

impl LensModelType {
    pub const ALL: [LensModelType; 11] = [
        LensModelType::Pinhole,
        LensModelType::Stereographic,
        LensModelType::Lonlat,
        LensModelType::Latlon,
        LensModelType::Opencv4,
        LensModelType::Opencv5,
        LensModelType::Opencv8,
        LensModelType::Opencv12,
        LensModelType::Cahvor,
        LensModelType::Cahvore,
        LensModelType::SplinedStereographic,
    ];

    /// Name without configuration, e.g. `LENSMODEL_CAHVORE`.
    pub fn base_name(self) -> &'static str {
        match self {
            LensModelType::Pinhole => "LENSMODEL_PINHOLE",
            LensModelType::Stereographic => "LENSMODEL_STEREOGRAPHIC",
            LensModelType::Lonlat => "LENSMODEL_LONLAT",
            LensModelType::Latlon => "LENSMODEL_LATLON",
            LensModelType::Opencv4 => "LENSMODEL_OPENCV4",
            LensModelType::Opencv5 => "LENSMODEL_OPENCV5",
            LensModelType::Opencv8 => "LENSMODEL_OPENCV8",
            LensModelType::Opencv12 => "LENSMODEL_OPENCV12",
            LensModelType::Cahvor => "LENSMODEL_CAHVOR",
            LensModelType::Cahvore => "LENSMODEL_CAHVORE",
            LensModelType::SplinedStereographic => "LENSMODEL_SPLINED_STEREOGRAPHIC",
        }
    }

    /// Name with `...` placeholders for every configuration value.
    pub fn name_template(self) -> String {
        match self {
            LensModelType::Cahvore => format!("{}_linearity=...", self.base_name()),
            LensModelType::SplinedStereographic => {
                format!("{}_order=..._Nx=..._Ny=..._fov_x_deg=...", self.base_name())
            }
            _ => self.base_name().to_string(),
        }
    }

    pub fn has_config(self) -> bool {
        matches!(
            self,
            LensModelType::Cahvore | LensModelType::SplinedStereographic
        )
    }

    pub fn metadata(self) -> LensModelMetadata {
        METADATA[self as usize]
    }

    fn unconfigured(self) -> Option<LensModel> {
        match self {
            LensModelType::Pinhole => Some(LensModel::Pinhole),
            LensModelType::Stereographic => Some(LensModel::Stereographic),
            LensModelType::Lonlat => Some(LensModel::Lonlat),
            LensModelType::Latlon => Some(LensModel::Latlon),
            LensModelType::Opencv4 => Some(LensModel::Opencv4),
            LensModelType::Opencv5 => Some(LensModel::Opencv5),
            LensModelType::Opencv8 => Some(LensModel::Opencv8),
            LensModelType::Opencv12 => Some(LensModel::Opencv12),
            LensModelType::Cahvor => Some(LensModel::Cahvor),
            LensModelType::Cahvore | LensModelType::SplinedStereographic => None,
        }
    }
}

impl fmt::Display for LensModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Static properties of a lens model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LensModelMetadata {
    /// The first four intrinsics are fx, fy, cx, cy
    pub has_core: bool,
    /// Points with z <= 0 still project meaningfully
    pub can_project_behind_camera: bool,
    /// Analytic gradients are available, so the model can be optimized
    pub has_gradients: bool,
    /// The projection center moves with the observation direction
    pub noncentral: bool,
}

const fn meta(
    has_core: bool,
    can_project_behind_camera: bool,
    has_gradients: bool,
    noncentral: bool,
) -> LensModelMetadata {
    LensModelMetadata {
        has_core,
        can_project_behind_camera,
        has_gradients,
        noncentral,
    }
}

/// Indexed by `LensModelType as usize`.
const METADATA: [LensModelMetadata; LensModelType::ALL.len()] = [
    meta(true, false, true, false), // Pinhole
    meta(true, true, true, false),  // Stereographic
    meta(true, true, true, false),  // Lonlat
    meta(true, true, true, false),  // Latlon
    meta(true, false, true, false), // Opencv4
    meta(true, false, true, false), // Opencv5
    meta(true, false, true, false), // Opencv8
    meta(true, false, true, false), // Opencv12
    meta(true, false, true, false), // Cahvor
    meta(true, false, false, true), // Cahvore
    meta(true, true, true, false),  // SplinedStereographic
];

/// A fully configured lens model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LensModel {
    Pinhole,
    Stereographic,
    Lonlat,
    Latlon,
    Opencv4,
    Opencv5,
    Opencv8,
    Opencv12,
    Cahvor,
    Cahvore(CahvoreConfig),
    SplinedStereographic(SplinedStereographicConfig),
}

impl LensModel {
    pub fn model_type(&self) -> LensModelType {
        match self {
            LensModel::Pinhole => LensModelType::Pinhole,
            LensModel::Stereographic => LensModelType::Stereographic,
            LensModel::Lonlat => LensModelType::Lonlat,
            LensModel::Latlon => LensModelType::Latlon,
            LensModel::Opencv4 => LensModelType::Opencv4,
            LensModel::Opencv5 => LensModelType::Opencv5,
            LensModel::Opencv8 => LensModelType::Opencv8,
            LensModel::Opencv12 => LensModelType::Opencv12,
            LensModel::Cahvor => LensModelType::Cahvor,
            LensModel::Cahvore(_) => LensModelType::Cahvore,
            LensModel::SplinedStereographic(_) => LensModelType::SplinedStereographic,
        }
    }

    pub fn metadata(&self) -> LensModelMetadata {
        self.model_type().metadata()
    }

    /// Number of intrinsics the model carries.
    pub fn num_params(&self) -> usize {
        match self {
            LensModel::Pinhole | LensModel::Stereographic | LensModel::Lonlat | LensModel::Latlon => 4,
            LensModel::Opencv4 => 8,
            LensModel::Opencv5 => 9,
            LensModel::Opencv8 => 12,
            LensModel::Opencv12 => 16,
            LensModel::Cahvor => 9,
            LensModel::Cahvore(_) => 12,
            LensModel::SplinedStereographic(config) => 4 + 2 * config.num_knots(),
        }
    }

    /// Number of intrinsics that are not part of the core.
    pub fn num_distortion_params(&self) -> usize {
        if self.metadata().has_core {
            self.num_params() - 4
        } else {
            self.num_params()
        }
    }

    /// Checks a directly constructed configuration.
    pub fn validate(&self) -> LensModelResult<()> {
        match self {
            LensModel::Cahvore(config) if !config.linearity.is_finite() => Err(
                LensModelError::Invalid(format!("CAHVORE linearity {} is not finite", config.linearity)),
            ),
            LensModel::SplinedStereographic(config) => config
                .validate()
                .map_err(LensModelError::Invalid),
            _ => Ok(()),
        }
    }

    /// Checks that an intrinsics vector has the length this model expects.
    pub fn check_intrinsics(&self, intrinsics: &[f64]) -> LensModelResult<()> {
        let expected = self.num_params();
        if intrinsics.len() != expected {
            return Err(LensModelError::IntrinsicsSizeMismatch {
                model: self.model_type().base_name(),
                expected,
                got: intrinsics.len(),
            });
        }
        Ok(())
    }

    /// Full model name, including the configuration.
    pub fn name(&self) -> LensModelResult<String> {
        self.validate()?;
        let base = self.model_type().base_name();
        Ok(match self {
            LensModel::Cahvore(config) => format!("{base}_linearity={}", config.linearity),
            LensModel::SplinedStereographic(config) => format!(
                "{base}_order={}_Nx={}_Ny={}_fov_x_deg={}",
                config.order, config.nx, config.ny, config.fov_x_deg
            ),
            _ => base.to_string(),
        })
    }

    /// Parses a model name.
    ///
    /// # Errors
    ///
    /// - `MissingConfig` for a configured type given without (or with a
    ///   placeholder) configuration
    /// - `BadConfig` for malformed or out-of-range configuration values
    /// - `UnknownType` for anything else
    pub fn from_name(name: &str) -> LensModelResult<Self> {
        let name = name.trim();
        if !name.starts_with(NAME_PREFIX) {
            return Err(LensModelError::UnknownType(name.to_string()));
        }

        for ty in LensModelType::ALL {
            if let Some(model) = ty.unconfigured() {
                if name == ty.base_name() {
                    return Ok(model);
                }
                continue;
            }

            if name == ty.base_name() {
                return Err(LensModelError::MissingConfig(name.to_string()));
            }
            let Some(config) = name
                .strip_prefix(ty.base_name())
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            return match ty {
                LensModelType::Cahvore => parse_cahvore_config(name, config),
                _ => parse_splined_config(name, config),
            };
        }
        Err(LensModelError::UnknownType(name.to_string()))
    }
}

impl fmt::Display for LensModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Ok(name) => f.write_str(&name),
            Err(_) => write!(f, "{}_<invalid>", self.model_type().base_name()),
        }
    }
}

impl std::str::FromStr for LensModel {
    type Err = LensModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LensModel::from_name(s)
    }
}

/// Name templates of every supported model.
pub fn supported_lensmodels() -> Vec<String> {
    LensModelType::ALL
        .iter()
        .map(|ty| ty.name_template())
        .collect()
}

fn bad_config(name: &str, reason: impl Into<String>) -> LensModelError {
    LensModelError::BadConfig {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Splits `key=value` off the front of `config`. The value runs up to the
/// next `_` (or the end).
fn take_field<'a>(name: &str, config: &'a str, key: &str) -> LensModelResult<(&'a str, &'a str)> {
    let rest = config
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or_else(|| bad_config(name, format!("expected '{key}=' in '{config}'")))?;
    let (value, rest) = match rest.find('_') {
        Some(end) => (&rest[..end], &rest[end..]),
        None => (rest, ""),
    };
    if value == "..." {
        return Err(LensModelError::MissingConfig(name.to_string()));
    }
    Ok((value, rest))
}

fn parse_value<T: std::str::FromStr>(name: &str, key: &str, value: &str) -> LensModelResult<T> {
    value
        .parse()
        .map_err(|_| bad_config(name, format!("cannot parse {key}='{value}'")))
}

fn parse_cahvore_config(name: &str, config: &str) -> LensModelResult<LensModel> {
    // The linearity may itself contain no underscores, so the whole tail is
    // the value.
    let value = config
        .strip_prefix("linearity=")
        .ok_or_else(|| bad_config(name, format!("expected 'linearity=' in '{config}'")))?;
    if value == "..." {
        return Err(LensModelError::MissingConfig(name.to_string()));
    }
    let linearity: f64 = parse_value(name, "linearity", value)?;
    if !linearity.is_finite() {
        return Err(bad_config(name, "linearity must be finite"));
    }
    Ok(LensModel::Cahvore(CahvoreConfig { linearity }))
}

fn parse_splined_config(name: &str, config: &str) -> LensModelResult<LensModel> {
    let (order, rest) = take_field(name, config, "order")?;
    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let (nx, rest) = take_field(name, rest, "Nx")?;
    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let (ny, rest) = take_field(name, rest, "Ny")?;
    let rest = rest.strip_prefix('_').unwrap_or(rest);

    // "fov_x_deg" contains underscores itself
    let fov = rest
        .strip_prefix("fov_x_deg=")
        .ok_or_else(|| bad_config(name, format!("expected 'fov_x_deg=' in '{rest}'")))?;
    if fov == "..." {
        return Err(LensModelError::MissingConfig(name.to_string()));
    }

    let config = SplinedStereographicConfig {
        order: parse_value(name, "order", order)?,
        nx: parse_value(name, "Nx", nx)?,
        ny: parse_value(name, "Ny", ny)?,
        fov_x_deg: parse_value(name, "fov_x_deg", fov)?,
    };
    config.validate().map_err(|reason| bad_config(name, reason))?;
    Ok(LensModel::SplinedStereographic(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_metadata_table_covers_every_type() {
        assert_eq!(METADATA.len(), LensModelType::ALL.len());
        for (i, ty) in LensModelType::ALL.iter().enumerate() {
            assert_eq!(*ty as usize, i);
        }
    }

    #[test]
    fn test_metadata_flags() {
        assert!(LensModelType::ALL.iter().all(|ty| ty.metadata().has_core));
        assert!(!LensModelType::Cahvore.metadata().has_gradients);
        assert!(LensModelType::Cahvore.metadata().noncentral);
        assert!(LensModelType::Cahvor.metadata().has_gradients);
        assert!(!LensModelType::Pinhole.metadata().can_project_behind_camera);
        assert!(LensModelType::Latlon.metadata().can_project_behind_camera);
        assert!(LensModelType::SplinedStereographic.metadata().can_project_behind_camera);
    }

    #[test]
    fn test_num_params() -> TestResult {
        let expected = [
            ("LENSMODEL_PINHOLE", 4),
            ("LENSMODEL_STEREOGRAPHIC", 4),
            ("LENSMODEL_LONLAT", 4),
            ("LENSMODEL_LATLON", 4),
            ("LENSMODEL_OPENCV4", 8),
            ("LENSMODEL_OPENCV5", 9),
            ("LENSMODEL_OPENCV8", 12),
            ("LENSMODEL_OPENCV12", 16),
            ("LENSMODEL_CAHVOR", 9),
            ("LENSMODEL_CAHVORE_linearity=0.34", 12),
            (
                "LENSMODEL_SPLINED_STEREOGRAPHIC_order=3_Nx=16_Ny=14_fov_x_deg=200",
                4 + 2 * 16 * 14,
            ),
        ];
        for (name, n) in expected {
            assert_eq!(LensModel::from_name(name)?.num_params(), n, "{name}");
        }
        Ok(())
    }

    #[test]
    fn test_name_round_trip() -> TestResult {
        let models = [
            LensModel::Pinhole,
            LensModel::Opencv8,
            LensModel::Cahvor,
            LensModel::Cahvore(CahvoreConfig { linearity: 0.37 }),
            LensModel::SplinedStereographic(SplinedStereographicConfig::new(2, 11, 8, 170)),
        ];
        for model in models {
            let name = model.name()?;
            assert_eq!(LensModel::from_name(&name)?, model);
        }
        Ok(())
    }

    #[test]
    fn test_missing_config() {
        for name in [
            "LENSMODEL_CAHVORE",
            "LENSMODEL_CAHVORE_linearity=...",
            "LENSMODEL_SPLINED_STEREOGRAPHIC",
            "LENSMODEL_SPLINED_STEREOGRAPHIC_order=..._Nx=..._Ny=..._fov_x_deg=...",
        ] {
            assert!(
                matches!(LensModel::from_name(name), Err(LensModelError::MissingConfig(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn test_bad_config() {
        for name in [
            "LENSMODEL_CAHVORE_linearity=abc",
            "LENSMODEL_CAHVORE_foo=1",
            "LENSMODEL_SPLINED_STEREOGRAPHIC_order=4_Nx=16_Ny=14_fov_x_deg=200",
            "LENSMODEL_SPLINED_STEREOGRAPHIC_order=3_Nx=3_Ny=14_fov_x_deg=200",
            "LENSMODEL_SPLINED_STEREOGRAPHIC_order=3_Nx=16_Ny=14_fov_x_deg=0",
            "LENSMODEL_SPLINED_STEREOGRAPHIC_order=3_Nx=16_Ny=14",
            "LENSMODEL_SPLINED_STEREOGRAPHIC_order=3_Nx=16_Ny=14_fov_x_deg=200x",
        ] {
            assert!(
                matches!(LensModel::from_name(name), Err(LensModelError::BadConfig { .. })),
                "{name}"
            );
        }
    }

    #[test]
    fn test_unknown_type() {
        for name in ["", "PINHOLE", "LENSMODEL_FISHEYE", "LENSMODEL_CAHVOR_linearity=1", "LENSMODEL_OPENCV"] {
            assert!(
                matches!(LensModel::from_name(name), Err(LensModelError::UnknownType(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn test_invalid_constructed_model_has_no_name() {
        let model = LensModel::SplinedStereographic(SplinedStereographicConfig::new(5, 10, 10, 100));
        assert!(matches!(model.name(), Err(LensModelError::Invalid(_))));
        let model = LensModel::Cahvore(CahvoreConfig { linearity: f64::NAN });
        assert!(model.name().is_err());
    }

    #[test]
    fn test_supported_lensmodels_are_templates() {
        let models = supported_lensmodels();
        assert_eq!(models.len(), LensModelType::ALL.len());
        assert!(models.contains(&"LENSMODEL_CAHVORE_linearity=...".to_string()));
        for template in models {
            // Templates of configured models parse as MissingConfig, the rest parse
            match LensModel::from_name(&template) {
                Ok(_) | Err(LensModelError::MissingConfig(_)) => {}
                Err(e) => panic!("{template}: {e}"),
            }
        }
    }

    #[test]
    fn test_splined_segments_per_u() {
        let config = SplinedStereographicConfig::new(3, 16, 14, 200);
        let u_edge = 2.0 * (200.0_f64.to_radians() / 4.0).tan();
        assert!((config.u_edge() - u_edge).abs() < 1e-12);
        assert!((config.segments_per_u() - 13.0 / (2.0 * u_edge)).abs() < 1e-12);
    }
}
