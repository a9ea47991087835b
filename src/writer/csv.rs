use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::join::PointCollection;

/// Writes a point collection as `x,y,z,<attributes>` rows in record order.
///
/// x and y are written without decimals, z with two, and each attribute with
/// the precision its schema field declares.
#[derive(Debug, Default)]
pub struct CsvWriter {
    overwrite: bool,
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Returns the number of data rows written.
    pub fn write(&self, collection: &PointCollection, output_path: &Path) -> Result<usize> {
        if output_path.exists() && !self.overwrite {
            anyhow::bail!("File already exists: {}", output_path.display());
        }
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create {}", output_path.display()))?;
        let mut out = BufWriter::new(file);
        let rows = self
            .write_to(collection, &mut out)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        out.flush()?;
        Ok(rows)
    }

    pub fn write_to<W: Write>(&self, collection: &PointCollection, out: &mut W) -> io::Result<usize> {
        let schema = collection.schema();

        write!(out, "x,y,z")?;
        for name in schema.names() {
            write!(out, ",{}", name)?;
        }
        writeln!(out)?;

        let mut rows = 0;
        for record in collection.iter() {
            write!(out, "{:.0},{:.0},{:.2}", record.x, record.y, record.z)?;
            for (field, value) in schema.fields().iter().zip(record.values()) {
                write!(out, ",{:.*}", field.precision, value)?;
            }
            writeln!(out)?;
            rows += 1;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::{merge_into, AttributeField, AttributeSchema, RasterPoints};
    use crate::model::Point;
    use tempfile::TempDir;

    fn collection() -> PointCollection {
        let schema = AttributeSchema::new(vec![
            AttributeField::new("chloride_laag").with_precision(0),
            AttributeField::new("suit_extraction"),
        ])
        .unwrap();
        let mut collection = PointCollection::new(schema);
        let points: RasterPoints = vec![
            Point { x: 25.0, y: 475.0, z: -49.75, value: 1234.4 },
            Point { x: 75.0, y: 475.0, z: -49.75, value: 87.6 },
        ]
        .into_iter()
        .collect();
        merge_into(&mut collection, &points, "chloride_laag").unwrap();
        collection
    }

    #[test]
    fn writes_header_and_formatted_rows() {
        let mut out = Vec::new();
        let rows = CsvWriter::new().write_to(&collection(), &mut out).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "x,y,z,chloride_laag,suit_extraction\n\
             25,475,-49.75,1234,0.000\n\
             75,475,-49.75,88,0.000\n"
        );
    }

    #[test]
    fn refuses_to_overwrite_by_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("point_data.csv");
        std::fs::write(&path, "old").unwrap();

        assert!(CsvWriter::new().write(&collection(), &path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");

        let rows = CsvWriter::new()
            .overwrite(true)
            .write(&collection(), &path)
            .unwrap();
        assert_eq!(rows, 2);
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .starts_with("x,y,z,chloride_laag"));
    }
}
