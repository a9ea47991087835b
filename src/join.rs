//! Raster-to-point conversion and the keyed point collection.
//!
//! Each layer is rasterized into a [`RasterPoints`] and then folded into a
//! [`PointCollection`] with [`merge_into`] (may create records) or
//! [`join_into`] (only updates records that already exist). When two layers
//! set the same attribute on the same key, the layer folded last wins, so
//! layer order is significant.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Point, PointKey, RasterGrid};

/// How a layer's points are folded into the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerRole {
    /// May introduce new points.
    Merge,
    /// May only update points a merge layer already created.
    Join,
}

impl std::fmt::Display for LayerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerRole::Merge => f.write_str("merge"),
            LayerRole::Join => f.write_str("join"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeField {
    pub name: String,
    pub default: f64,
    /// Decimals used when the field is exported.
    pub precision: usize,
}

impl AttributeField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: 0.0,
            precision: 3,
        }
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }
}

/// The fixed set of named attributes every record carries.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    fields: Vec<AttributeField>,
}

impl AttributeSchema {
    pub fn new(fields: Vec<AttributeField>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(Error::invalid_config("attribute name must not be empty"));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::invalid_config(format!(
                    "attribute '{}' is declared twice",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(AttributeField::new).collect())
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| Error::UnknownAttribute {
                name: name.to_string(),
            })
    }

    pub fn fields(&self) -> &[AttributeField] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn defaults(&self) -> impl Iterator<Item = f64> + '_ {
        self.fields.iter().map(|f| f.default)
    }
}

/// Points of one grid keyed by coordinate identity, in scan order.
///
/// If two cells share a key the later cell's point replaces the earlier one
/// but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct RasterPoints {
    points: Vec<Point>,
    index: HashMap<PointKey, usize>,
}

impl RasterPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, point: Point) {
        let key = point.key();
        match self.index.get(&key).copied() {
            Some(i) => self.points[i] = point,
            None => {
                self.index.insert(key, self.points.len());
                self.points.push(point);
            }
        }
    }

    pub fn get(&self, key: &PointKey) -> Option<&Point> {
        self.index.get(key).map(|&i| &self.points[i])
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PointKey, &Point)> {
        self.points.iter().map(|p| (p.key(), p))
    }
}

impl FromIterator<Point> for RasterPoints {
    fn from_iter<T: IntoIterator<Item = Point>>(iter: T) -> Self {
        let mut points = RasterPoints::new();
        for p in iter {
            points.insert(p);
        }
        points
    }
}

/// Converts every non-missing cell of `grid` into a point at height `z`.
///
/// Rows are scanned in parallel; the result is identical to a sequential
/// north-to-south, west-to-east scan.
pub fn rasterize(grid: &RasterGrid, z: f64) -> Result<RasterPoints> {
    grid.validate()?;

    let rows: Vec<Vec<Point>> = (0..grid.rows)
        .into_par_iter()
        .map(|r| {
            grid.row(r)
                .iter()
                .enumerate()
                .filter(|(_, v)| !grid.is_missing(**v))
                .map(|(c, &value)| {
                    let (x, y) = grid.cell_center(r, c);
                    Point { x, y, z, value }
                })
                .collect()
        })
        .collect();

    let points: RasterPoints = rows.into_iter().flatten().collect();
    debug!(
        "Rasterized {}x{} grid at z={}: {} points",
        grid.columns,
        grid.rows,
        z,
        points.len()
    );
    Ok(points)
}

/// Borrowed view of one record in a [`PointCollection`].
#[derive(Debug, Clone, Copy)]
pub struct PointRecord<'a> {
    pub key: PointKey,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    values: &'a [f64],
}

impl<'a> PointRecord<'a> {
    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }
}

#[derive(Debug, Clone, Copy)]
struct Location {
    key: PointKey,
    x: f64,
    y: f64,
    z: f64,
}

/// The joined dataset: one record per coordinate key, one value per schema
/// attribute, kept in creation order.
///
/// Attribute values live in one flat buffer (`records * attributes`) so a
/// record costs no allocation of its own.
#[derive(Debug, Clone)]
pub struct PointCollection {
    schema: AttributeSchema,
    locations: Vec<Location>,
    values: Vec<f64>,
    index: HashMap<PointKey, usize>,
}

/// Outcome of folding one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    pub created: usize,
    pub updated: usize,
    pub ignored: usize,
}

impl PointCollection {
    pub fn new(schema: AttributeSchema) -> Self {
        Self {
            schema,
            locations: Vec::new(),
            values: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, key: &PointKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &PointKey) -> Option<PointRecord<'_>> {
        self.index.get(key).map(|&i| self.record(i))
    }

    /// Value of `attribute` at `key`, `None` if there is no record.
    pub fn value(&self, key: &PointKey, attribute: &str) -> Result<Option<f64>> {
        let a = self.schema.index_of(attribute)?;
        Ok(self.get(key).and_then(|r| r.get(a)))
    }

    pub fn iter(&self) -> impl Iterator<Item = PointRecord<'_>> {
        (0..self.locations.len()).map(move |i| self.record(i))
    }

    /// Records where every listed attribute is strictly positive. A genuine
    /// zero measurement counts as absent.
    pub fn count_complete(&self, attributes: &[&str]) -> Result<usize> {
        let indices = attributes
            .iter()
            .map(|name| self.schema.index_of(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(self
            .iter()
            .filter(|r| indices.iter().all(|&a| r.values[a] > 0.0))
            .count())
    }

    /// Folds a layer according to `role`.
    pub fn fold(
        &mut self,
        points: &RasterPoints,
        attribute: &str,
        role: LayerRole,
    ) -> Result<FoldStats> {
        match role {
            LayerRole::Merge => merge_into(self, points, attribute),
            LayerRole::Join => join_into(self, points, attribute),
        }
    }

    fn record(&self, i: usize) -> PointRecord<'_> {
        let loc = &self.locations[i];
        let width = self.schema.len();
        PointRecord {
            key: loc.key,
            x: loc.x,
            y: loc.y,
            z: loc.z,
            values: &self.values[i * width..(i + 1) * width],
        }
    }

    fn insert_default(&mut self, key: PointKey, point: &Point) -> usize {
        let i = self.locations.len();
        self.locations.push(Location {
            key,
            x: point.x,
            y: point.y,
            z: point.z,
        });
        self.values.extend(self.schema.defaults());
        self.index.insert(key, i);
        i
    }

    fn set(&mut self, i: usize, attribute: usize, value: f64) {
        let width = self.schema.len();
        self.values[i * width + attribute] = value;
    }
}

/// Sets `attribute` on every point's record, creating records with default
/// values for keys not yet in the collection.
pub fn merge_into(
    collection: &mut PointCollection,
    points: &RasterPoints,
    attribute: &str,
) -> Result<FoldStats> {
    let a = collection.schema.index_of(attribute)?;
    let mut stats = FoldStats::default();
    for (key, point) in points.iter() {
        let existing = collection.index.get(&key).copied();
        let i = match existing {
            Some(i) => {
                stats.updated += 1;
                i
            }
            None => {
                stats.created += 1;
                collection.insert_default(key, point)
            }
        };
        collection.set(i, a, point.value);
    }
    Ok(stats)
}

/// Sets `attribute` on records that already exist; other keys are ignored.
pub fn join_into(
    collection: &mut PointCollection,
    points: &RasterPoints,
    attribute: &str,
) -> Result<FoldStats> {
    let a = collection.schema.index_of(attribute)?;
    let mut stats = FoldStats::default();
    for (key, point) in points.iter() {
        let existing = collection.index.get(&key).copied();
        match existing {
            Some(i) => {
                stats.updated += 1;
                collection.set(i, a, point.value);
            }
            None => stats.ignored += 1,
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Extent;

    fn two_cell_grid(samples: Vec<f64>) -> RasterGrid {
        RasterGrid::new(
            samples,
            2,
            1,
            100.0,
            Extent::new(0.0, 0.0, 200.0, 100.0),
            -9999.0,
        )
        .unwrap()
    }

    fn schema() -> AttributeSchema {
        AttributeSchema::new(vec![
            AttributeField::new("depthA").with_precision(0),
            AttributeField::new("depthB").with_default(-1.0),
        ])
        .unwrap()
    }

    fn point(x: f64, y: f64, z: f64, value: f64) -> Point {
        Point { x, y, z, value }
    }

    #[test]
    fn rasterize_skips_missing_cells() {
        let grid = two_cell_grid(vec![5.0, -9999.0]);
        let points = rasterize(&grid, 1.5).unwrap();

        assert_eq!(points.len(), 1);
        let (key, p) = points.iter().next().unwrap();
        assert_eq!(key.to_string(), "50_50_1.50");
        assert_eq!(*p, point(50.0, 50.0, 1.5, 5.0));
    }

    #[test]
    fn rasterize_scans_north_to_south() {
        let grid = RasterGrid::new(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            3,
            2,
            10.0,
            Extent::new(1000.0, 2000.0, 1030.0, 2020.0),
            0.0,
        )
        .unwrap();
        let points = rasterize(&grid, -0.25).unwrap();
        let coords: Vec<(f64, f64, f64)> =
            points.iter().map(|(_, p)| (p.x, p.y, p.value)).collect();
        assert_eq!(
            coords,
            vec![
                (1005.0, 2015.0, 1.0),
                (1015.0, 2015.0, 2.0),
                (1025.0, 2015.0, 3.0),
                (1005.0, 2005.0, 4.0),
                (1015.0, 2005.0, 5.0),
                (1025.0, 2005.0, 6.0),
            ]
        );
    }

    #[test]
    fn rasterize_uses_the_grid_sentinel() {
        let mut grid = two_cell_grid(vec![-9999.0, 0.0]);
        grid.no_data_value = 0.0;
        let points = rasterize(&grid, 0.0).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points.iter().next().unwrap().1.value, -9999.0);
    }

    #[test]
    fn rasterize_rejects_mismatched_shape() {
        let mut grid = two_cell_grid(vec![1.0, 2.0]);
        grid.samples.push(3.0);
        assert!(matches!(rasterize(&grid, 0.0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn sub_unit_cells_collapse_last_wins() {
        let points: RasterPoints = vec![
            point(10.2, 10.0, 0.0, 1.0),
            point(20.0, 10.0, 0.0, 2.0),
            point(9.9, 10.1, 0.0, 3.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(points.len(), 2);
        let first = points.iter().next().unwrap().1;
        assert_eq!(first.value, 3.0);
    }

    #[test]
    fn merge_creates_record_with_defaults() {
        let grid = two_cell_grid(vec![5.0, -9999.0]);
        let points = rasterize(&grid, 1.5).unwrap();
        let mut collection = PointCollection::new(schema());

        let stats = merge_into(&mut collection, &points, "depthA").unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(collection.len(), 1);

        let key = PointKey::from_coords(50.0, 50.0, 1.5);
        assert_eq!(collection.value(&key, "depthA").unwrap(), Some(5.0));
        assert_eq!(collection.value(&key, "depthB").unwrap(), Some(-1.0));
    }

    #[test]
    fn join_never_creates_records() {
        let grid = two_cell_grid(vec![5.0, -9999.0]);
        let mut collection = PointCollection::new(schema());
        merge_into(&mut collection, &rasterize(&grid, 1.5).unwrap(), "depthA").unwrap();

        let stray: RasterPoints = std::iter::once(point(999.0, 999.0, 1.5, 7.0)).collect();
        let stats = join_into(&mut collection, &stray, "depthB").unwrap();

        assert_eq!(stats, FoldStats { created: 0, updated: 0, ignored: 1 });
        assert_eq!(collection.len(), 1);
        let key = PointKey::from_coords(50.0, 50.0, 1.5);
        assert_eq!(collection.value(&key, "depthB").unwrap(), Some(-1.0));
        assert!(!collection.contains(&PointKey::from_coords(999.0, 999.0, 1.5)));
    }

    #[test]
    fn join_updates_only_its_attribute() {
        let mut collection = PointCollection::new(schema());
        let base: RasterPoints = std::iter::once(point(50.0, 50.0, 1.5, 5.0)).collect();
        merge_into(&mut collection, &base, "depthA").unwrap();

        let refine: RasterPoints = std::iter::once(point(50.3, 49.8, 1.5, 0.25)).collect();
        let stats = collection.fold(&refine, "depthB", LayerRole::Join).unwrap();
        assert_eq!(stats.updated, 1);

        let record = collection.iter().next().unwrap();
        assert_eq!(record.values(), &[5.0, 0.25]);
        assert_eq!((record.x, record.y, record.z), (50.0, 50.0, 1.5));
    }

    #[test]
    fn later_layers_win_for_the_same_attribute() {
        let mut collection = PointCollection::new(schema());
        let first: RasterPoints = std::iter::once(point(50.0, 50.0, 1.5, 5.0)).collect();
        let second: RasterPoints = std::iter::once(point(50.0, 50.0, 1.5, 8.0)).collect();
        merge_into(&mut collection, &first, "depthA").unwrap();
        let stats = merge_into(&mut collection, &second, "depthA").unwrap();

        assert_eq!(stats, FoldStats { created: 0, updated: 1, ignored: 0 });
        let key = PointKey::from_coords(50.0, 50.0, 1.5);
        assert_eq!(collection.value(&key, "depthA").unwrap(), Some(8.0));
    }

    #[test]
    fn unknown_attribute_leaves_collection_untouched() {
        let mut collection = PointCollection::new(schema());
        let points: RasterPoints = std::iter::once(point(50.0, 50.0, 1.5, 5.0)).collect();

        let err = merge_into(&mut collection, &points, "depthZ").unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { .. }));
        assert!(collection.is_empty());
    }

    #[test]
    fn count_complete_requires_positive_values() {
        let mut collection = PointCollection::new(
            AttributeSchema::from_names(["midden", "suit_extraction"]).unwrap(),
        );
        let merge: RasterPoints = vec![
            point(0.0, 0.0, 0.0, 1.0),
            point(1.0, 0.0, 0.0, 2.0),
            point(2.0, 0.0, 0.0, 3.0),
        ]
        .into_iter()
        .collect();
        merge_into(&mut collection, &merge, "midden").unwrap();

        let join: RasterPoints = vec![point(0.0, 0.0, 0.0, 0.5), point(1.0, 0.0, 0.0, 0.0)]
            .into_iter()
            .collect();
        join_into(&mut collection, &join, "suit_extraction").unwrap();

        assert_eq!(
            collection.count_complete(&["midden", "suit_extraction"]).unwrap(),
            1
        );
    }

    #[test]
    fn schema_rejects_duplicate_names() {
        assert!(matches!(
            AttributeSchema::from_names(["a", "b", "a"]),
            Err(Error::InvalidConfig(_))
        ));
    }
}
