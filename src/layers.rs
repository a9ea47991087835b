//! Layer enumeration: z-levels, file-name templates and the YAML stack
//! configuration that ties attributes to raster files.
//!
//! ```yaml
//! z_range: { start: -49.75, end: 23.75, step: 0.5 }
//! side_labels: { below: onder, above: boven }
//! summary_attributes: [chloride_midden, suit_extraction]
//! layers:
//!   - attribute: chloride_midden
//!     role: merge
//!     dir: asc
//!     template: "chloride_midden_{z}.asc"
//!     precision: 0
//!   - attribute: suit_extraction
//!     role: join
//!     dir: suit50m
//!     template: "ASC_Suitability_extraction_{side}_{z_abs}cm.tif"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::align::{round_to, GEOTRANSFORM_PRECISION};
use crate::error::{Error, Result};
use crate::join::{AttributeField, AttributeSchema, LayerRole};

/// Upper bound on the number of z-levels in one run.
pub const MAX_Z_LEVELS: usize = 1000;

const DEFAULT_PRECISION: usize = 3;

/// Inclusive range of z-levels `start, start + step, ..., end`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ZRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl ZRange {
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self { start, end, step }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(Error::invalid_config(format!(
                "z range must be finite: {:?}",
                self
            )));
        }
        if self.step <= 0.0 {
            return Err(Error::invalid_config(format!(
                "z step must be positive, got {}",
                self.step
            )));
        }
        if self.end < self.start {
            return Err(Error::invalid_config(format!(
                "z range ends before it starts: {} > {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Levels are generated by integer multiplication, so accumulated step
    /// error can neither skip `end` nor run past it. `end` is included when
    /// it lies on the step lattice. More than [`MAX_Z_LEVELS`] levels is an
    /// early stop: the sequence is truncated and a warning logged.
    pub fn levels(&self) -> Result<Vec<f64>> {
        self.validate()?;

        let steps = ((self.end - self.start) / self.step + 1e-9).floor();
        let count = if steps + 1.0 > MAX_Z_LEVELS as f64 {
            warn!(
                "Early stop: z range {} to {} by {} exceeds {} levels",
                self.start, self.end, self.step, MAX_Z_LEVELS
            );
            MAX_Z_LEVELS
        } else {
            steps as usize + 1
        };

        Ok((0..count)
            .map(|i| round_to(self.start + i as f64 * self.step, GEOTRANSFORM_PRECISION))
            .collect())
    }
}

/// Shortest decimal form of `z`, always with a fractional part (`1.0`).
/// Never uses exponent notation, so `1e-5` renders as `0.00001`.
pub fn z_label_raw(z: f64) -> String {
    let s = z.to_string();
    if s.contains('.') || !z.is_finite() {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Compact z label used in file names: `-49.75` -> `-4975`, `-0.25` -> `-25`,
/// `0.75` -> `75`, `1.0` -> `10`.
pub fn z_label(z: f64) -> String {
    let raw = z_label_raw(z);
    if z.abs() < 1.0 {
        raw.replace("0.", "")
    } else {
        raw.replace('.', "")
    }
}

/// [`z_label`] without the sign.
pub fn z_label_abs(z: f64) -> String {
    z_label(z).replace('-', "")
}

/// Words substituted for `{side}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SideLabels {
    pub below: String,
    pub above: String,
}

impl Default for SideLabels {
    fn default() -> Self {
        Self {
            below: "below".to_string(),
            above: "above".to_string(),
        }
    }
}

impl SideLabels {
    pub fn for_z(&self, z: f64) -> &str {
        if z < 0.0 {
            &self.below
        } else {
            &self.above
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Z,
    ZAbs,
    ZRaw,
    Side,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A file-name pattern expanded once per z-level.
///
/// Tokens: `{z}`, `{z_abs}`, `{z_raw}` and `{side}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NameTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if rest[..open].contains('}') {
                return Err(Error::invalid_config(format!(
                    "unmatched '}}' in template '{}'",
                    template
                )));
            }
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                Error::invalid_config(format!("unclosed '{{' in template '{}'", template))
            })?;
            let token = match &after[..close] {
                "z" => Token::Z,
                "z_abs" => Token::ZAbs,
                "z_raw" => Token::ZRaw,
                "side" => Token::Side,
                other => {
                    return Err(Error::invalid_config(format!(
                        "unknown token '{{{}}}' in template '{}'",
                        other, template
                    )))
                }
            };
            segments.push(Segment::Token(token));
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(Error::invalid_config(format!(
                "unmatched '}}' in template '{}'",
                template
            )));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn render(&self, z: f64, sides: &SideLabels) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Token(Token::Z) => out.push_str(&z_label(z)),
                Segment::Token(Token::ZAbs) => out.push_str(&z_label_abs(z)),
                Segment::Token(Token::ZRaw) => out.push_str(&z_label_raw(z)),
                Segment::Token(Token::Side) => out.push_str(sides.for_z(z)),
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// One attribute layer: where its rasters live and how they are folded.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub attribute: String,
    pub role: LayerRole,
    pub dir: PathBuf,
    pub template: NameTemplate,
}

impl LayerSpec {
    pub fn new(
        attribute: impl Into<String>,
        role: LayerRole,
        dir: impl Into<PathBuf>,
        template: &str,
    ) -> Result<Self> {
        Ok(Self {
            attribute: attribute.into(),
            role,
            dir: dir.into(),
            template: NameTemplate::parse(template)?,
        })
    }

    pub fn path_for(&self, z: f64, sides: &SideLabels) -> PathBuf {
        self.dir.join(self.template.render(z, sides))
    }
}

/// A complete, validated run configuration. Layers are processed in order,
/// every z-level of one layer before the next layer.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub z_range: ZRange,
    pub side_labels: SideLabels,
    pub layers: Vec<LayerSpec>,
    pub schema: AttributeSchema,
    pub summary_attributes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlStackConfig {
    z_range: ZRange,
    #[serde(default)]
    side_labels: SideLabels,
    #[serde(default)]
    summary_attributes: Vec<String>,
    layers: Vec<YamlLayer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlLayer {
    attribute: String,
    role: LayerRole,
    #[serde(default)]
    dir: Option<PathBuf>,
    template: String,
    #[serde(default)]
    default: Option<f64>,
    #[serde(default)]
    precision: Option<usize>,
}

impl StackConfig {
    pub fn new(
        z_range: ZRange,
        side_labels: SideLabels,
        layers: Vec<LayerSpec>,
        schema: AttributeSchema,
    ) -> Result<Self> {
        let config = Self {
            z_range,
            side_labels,
            layers,
            schema,
            summary_attributes: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML configuration. Relative layer directories resolve
    /// against the configuration file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::load_with_base(path, base)
    }

    pub fn load_with_base(path: &Path, base_dir: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents, base_dir)
    }

    pub fn from_yaml_str(yaml: &str, base_dir: &Path) -> Result<Self> {
        let raw: YamlStackConfig = serde_yaml::from_str(yaml)?;

        let mut fields: Vec<AttributeField> = Vec::new();
        let mut layers = Vec::with_capacity(raw.layers.len());
        for layer in raw.layers {
            declare_field(&mut fields, &layer)?;
            let dir = match &layer.dir {
                Some(d) if d.is_absolute() => d.clone(),
                Some(d) => base_dir.join(d),
                None => base_dir.to_path_buf(),
            };
            layers.push(LayerSpec::new(
                layer.attribute,
                layer.role,
                dir,
                &layer.template,
            )?);
        }

        let config = Self {
            z_range: raw.z_range,
            side_labels: raw.side_labels,
            layers,
            schema: AttributeSchema::new(fields)?,
            summary_attributes: raw.summary_attributes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.z_range.validate()?;
        if self.layers.is_empty() {
            return Err(Error::invalid_config("no layers configured"));
        }
        for layer in &self.layers {
            self.schema.index_of(&layer.attribute)?;
        }
        for name in &self.summary_attributes {
            self.schema.index_of(name)?;
        }
        if let Some(first) = self.layers.first() {
            if first.role == LayerRole::Join {
                warn!(
                    "First layer '{}' is a join layer and can only update existing points",
                    first.attribute
                );
            }
        }
        Ok(())
    }

    pub fn z_levels(&self) -> Result<Vec<f64>> {
        self.z_range.levels()
    }
}

/// Adds the layer's attribute to the schema, or checks that a repeated
/// declaration agrees with the first one.
fn declare_field(fields: &mut Vec<AttributeField>, layer: &YamlLayer) -> Result<()> {
    match fields.iter_mut().find(|f| f.name == layer.attribute) {
        None => {
            fields.push(
                AttributeField::new(layer.attribute.clone())
                    .with_default(layer.default.unwrap_or(0.0))
                    .with_precision(layer.precision.unwrap_or(DEFAULT_PRECISION)),
            );
            Ok(())
        }
        Some(existing) => {
            let default_conflict = layer.default.is_some_and(|d| d != existing.default);
            let precision_conflict = layer.precision.is_some_and(|p| p != existing.precision);
            if default_conflict || precision_conflict {
                return Err(Error::invalid_config(format!(
                    "attribute '{}' is redeclared with a different default or precision",
                    layer.attribute
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_include_the_end_value() {
        let levels = ZRange::new(-12.25, -10.25, 0.5).levels().unwrap();
        assert_eq!(levels, vec![-12.25, -11.75, -11.25, -10.75, -10.25]);
    }

    #[test]
    fn levels_do_not_drift_with_inexact_steps() {
        let levels = ZRange::new(0.0, 1.0, 0.1).levels().unwrap();
        assert_eq!(levels.len(), 11);
        assert_eq!(levels[3], 0.3);
        assert_eq!(levels[10], 1.0);
    }

    #[test]
    fn full_freshwater_range_has_148_levels() {
        let levels = ZRange::new(-49.75, 23.75, 0.5).levels().unwrap();
        assert_eq!(levels.len(), 148);
        assert_eq!(levels.first(), Some(&-49.75));
        assert_eq!(levels.last(), Some(&23.75));
    }

    #[test]
    fn off_lattice_end_stops_before_end() {
        let levels = ZRange::new(0.0, 1.0, 0.3).levels().unwrap();
        assert_eq!(levels, vec![0.0, 0.3, 0.6, 0.9]);
    }

    #[test]
    fn oversized_range_stops_early() {
        let levels = ZRange::new(0.0, 1.0e6, 0.5).levels().unwrap();
        assert_eq!(levels.len(), MAX_Z_LEVELS);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(ZRange::new(0.0, 1.0, 0.0).levels().is_err());
        assert!(ZRange::new(0.0, 1.0, -0.5).levels().is_err());
        assert!(ZRange::new(2.0, 1.0, 0.5).levels().is_err());
        assert!(ZRange::new(0.0, f64::INFINITY, 0.5).levels().is_err());
    }

    #[test]
    fn z_labels_follow_file_naming() {
        assert_eq!(z_label(-49.75), "-4975");
        assert_eq!(z_label(-0.25), "-25");
        assert_eq!(z_label(0.75), "75");
        assert_eq!(z_label(23.75), "2375");
        assert_eq!(z_label(1.0), "10");
        assert_eq!(z_label_abs(-49.75), "4975");
        assert_eq!(z_label_raw(-49.75), "-49.75");
        assert_eq!(z_label_raw(2.0), "2.0");
    }

    #[test]
    fn template_expands_tokens() {
        let t = NameTemplate::parse("ASC_Suitability_extraction_{side}_{z_abs}cm.tif").unwrap();
        let sides = SideLabels {
            below: "onder".to_string(),
            above: "boven".to_string(),
        };
        assert_eq!(
            t.render(-0.25, &sides),
            "ASC_Suitability_extraction_onder_25cm.tif"
        );
        assert_eq!(
            t.render(23.75, &sides),
            "ASC_Suitability_extraction_boven_2375cm.tif"
        );

        let t = NameTemplate::parse("chloride_laag_{z}.asc").unwrap();
        assert_eq!(t.render(-49.75, &sides), "chloride_laag_-4975.asc");
    }

    #[test]
    fn template_rejects_unknown_tokens() {
        assert!(matches!(
            NameTemplate::parse("layer_{depth}.tif"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(NameTemplate::parse("layer_{z.tif").is_err());
        assert!(NameTemplate::parse("layer_z}.tif").is_err());
    }

    const YAML: &str = r#"
z_range: { start: -0.75, end: 0.25, step: 0.5 }
side_labels: { below: onder, above: boven }
summary_attributes: [chloride_midden, suit_extraction]
layers:
  - attribute: chloride_laag
    role: merge
    dir: asc
    template: "chloride_laag_{z}.asc"
    precision: 0
  - attribute: chloride_midden
    role: merge
    dir: asc
    template: "chloride_midden_{z}.asc"
    precision: 0
  - attribute: suit_extraction
    role: join
    dir: /data/suit50m
    template: "ASC_Suitability_extraction_{side}_{z_abs}cm.tif"
"#;

    #[test]
    fn yaml_config_builds_schema_in_layer_order() {
        let config = StackConfig::from_yaml_str(YAML, Path::new("/runs")).unwrap();
        let names: Vec<&str> = config.schema.names().collect();
        assert_eq!(names, vec!["chloride_laag", "chloride_midden", "suit_extraction"]);
        assert_eq!(config.schema.fields()[0].precision, 0);
        assert_eq!(config.schema.fields()[2].precision, DEFAULT_PRECISION);
        assert_eq!(config.z_levels().unwrap(), vec![-0.75, -0.25, 0.25]);

        let sides = &config.side_labels;
        assert_eq!(
            config.layers[0].path_for(-0.75, sides),
            PathBuf::from("/runs/asc/chloride_laag_-75.asc")
        );
        assert_eq!(
            config.layers[2].path_for(-0.25, sides),
            PathBuf::from("/data/suit50m/ASC_Suitability_extraction_onder_25cm.tif")
        );
        assert_eq!(config.layers[2].role, LayerRole::Join);
    }

    #[test]
    fn yaml_config_rejects_unknown_summary_attribute() {
        let yaml = YAML.replace("[chloride_midden, suit_extraction]", "[chloride_hoog]");
        assert!(matches!(
            StackConfig::from_yaml_str(&yaml, Path::new("/runs")),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn yaml_config_rejects_conflicting_redeclaration() {
        let yaml = r#"
z_range: { start: 0.0, end: 1.0, step: 0.5 }
layers:
  - { attribute: a, role: merge, template: "a_{z}.tif", default: 0.0 }
  - { attribute: a, role: join, template: "b_{z}.tif", default: -1.0 }
"#;
        assert!(matches!(
            StackConfig::from_yaml_str(yaml, Path::new(".")),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn yaml_config_rejects_bad_role() {
        let yaml = r#"
z_range: { start: 0.0, end: 1.0, step: 0.5 }
layers:
  - { attribute: a, role: append, template: "a_{z}.tif" }
"#;
        assert!(matches!(
            StackConfig::from_yaml_str(yaml, Path::new(".")),
            Err(Error::Yaml(_))
        ));
    }
}
