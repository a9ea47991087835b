use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use raster_stack::reader::RasterInfo;
use raster_stack::{
    align_extent, CsvWriter, GdalRasterSource, GeoTiffWriter, StackConfig, StackJoiner,
};

const RASTER_EXTENSIONS: [&str; 3] = ["tif", "tiff", "asc"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker threads (default: number of CPU cores)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Nodata sentinel for rasters whose band declares none
    #[arg(long, global = true, allow_negative_numbers = true)]
    nodata: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print cell size, dimensions, extent and nodata of a raster
    Info {
        #[arg(value_name = "RASTER")]
        raster: PathBuf,
    },

    /// Compute cell-size aligned extents for a raster or a directory of rasters
    Align {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Write aligned GeoTIFF copies into this directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Join a configured raster stack into a point CSV
    Join {
        /// YAML stack configuration
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Output CSV file
        #[arg(short, long, value_name = "CSV")]
        output: PathBuf,

        /// Resolve relative layer directories against this directory instead
        /// of the configuration file's
        #[arg(long, value_name = "DIR")]
        base_dir: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,

        /// Abort on the first unusable raster
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let start_time = std::time::Instant::now();

    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    let mut source = GdalRasterSource::new();
    if let Some(nodata) = args.nodata {
        source = source.with_fallback_no_data(nodata);
    }

    match &args.command {
        Command::Info { raster } => {
            let info = RasterInfo::read(raster)
                .with_context(|| format!("Failed to read {}", raster.display()))?;
            println!("{}", raster.display());
            println!("{}", info);
        }
        Command::Align { input, output } => {
            if let Some(dir) = output {
                fs::create_dir_all(dir)?;
            }
            if input.is_file() {
                align_file(input, output.as_deref(), &source)?;
            } else if input.is_dir() {
                info!("Processing directory: {:?}", input);
                align_directory(input, output.as_deref(), &source)?;
            } else {
                error!("Invalid input path: {:?}", input);
                anyhow::bail!("Input path must be a raster file or directory");
            }
        }
        Command::Join {
            config,
            output,
            base_dir,
            force,
            strict,
        } => {
            run_join(config, output, base_dir.as_deref(), *force, *strict, source)?;
        }
    }

    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn run_join(
    config_path: &Path,
    output: &Path,
    base_dir: Option<&Path>,
    force: bool,
    strict: bool,
    source: GdalRasterSource,
) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("File already exists: {}", output.display());
    }

    let config = match base_dir {
        Some(base) => StackConfig::load_with_base(config_path, base),
        None => StackConfig::load(config_path),
    }
    .with_context(|| format!("Failed to load {}", config_path.display()))?;

    info!("Reading rasters...");
    let report = StackJoiner::new(&config, source).strict(strict).run()?;

    info!("Data points found: {}", report.collection.len());
    info!("Rasters skipped  : {}", report.skipped.len());

    info!("Writing to csv: {:?}", output);
    let rows = CsvWriter::new()
        .overwrite(force)
        .write(&report.collection, output)?;
    info!("Written {} rows", rows);

    if !report.skipped.is_empty() {
        warn!("Rasters skipped:");
        for skipped in &report.skipped {
            warn!("  {}", skipped.path.display());
        }
    }

    if !config.summary_attributes.is_empty() {
        let complete = report.complete_points(&config.summary_attributes)?;
        info!(
            "Points with all of [{}]: {}",
            config.summary_attributes.join(", "),
            complete
        );
    }

    if !report.failed.is_empty() {
        error!("Failed to use {} rasters:", report.failed.len());
        for failed in &report.failed {
            error!("  {}: {}", failed.path.display(), failed.reason);
        }
        anyhow::bail!("{} rasters failed to process", report.failed.len());
    }

    Ok(())
}

fn align_file(path: &Path, output: Option<&Path>, source: &GdalRasterSource) -> Result<()> {
    let info =
        RasterInfo::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let aligned = align_extent(&info.extent, info.cell_size)?;
    let (ulx, uly, lrx, lry) = aligned.ullr();
    println!(
        "{}: {} -> {} (-a_ullr {} {} {} {})",
        path.display(),
        info.extent,
        aligned,
        ulx,
        uly,
        lrx,
        lry
    );

    if let Some(dir) = output {
        let raster = source
            .read_full(path)?
            .with_context(|| format!("Raster not found: {}", path.display()))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("raster");
        let output_path = dir.join(format!("{}_aligned.tif", stem));

        let writer = GeoTiffWriter::new();
        writer.write_aligned(&raster, &aligned, &output_path)?;
        info!("Written aligned GeoTIFF: {:?}", output_path);
    }

    Ok(())
}

fn align_directory(dir: &Path, output: Option<&Path>, source: &GdalRasterSource) -> Result<()> {
    use rayon::prelude::*;

    let input_files = collect_input_files(dir)?;
    info!("Found {} input rasters", input_files.len());

    let results: Vec<Result<()>> = input_files
        .par_iter()
        .map(|path| align_file(path, output, source))
        .collect();

    let mut errors = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            errors.push(format!("{}: {:#}", input_files[i].display(), e));
        }
    }

    if !errors.is_empty() {
        error!("Failed to process {} files:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} files failed to process", errors.len());
    }

    Ok(())
}

/// Raster files under `dir`, recursively, in path order.
fn collect_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    use rayon::prelude::*;

    let entries: Result<Vec<_>, _> = fs::read_dir(dir)?.collect();
    let entries = entries?;

    let nested: Vec<Vec<PathBuf>> = entries
        .into_par_iter()
        .map(|entry| -> Result<Vec<PathBuf>> {
            let path = entry.path();
            if path.is_dir() {
                return collect_input_files(&path);
            }
            let is_raster = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext.to_ascii_lowercase())
                .is_some_and(|ext| RASTER_EXTENSIONS.contains(&ext.as_str()));
            Ok(if is_raster { vec![path] } else { Vec::new() })
        })
        .collect::<Result<_>>()?;

    let mut files: Vec<PathBuf> = nested.into_iter().flatten().collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collects_rasters_recursively_in_order() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("suit100m");
        fs::create_dir_all(&sub).unwrap();
        for name in ["b.tif", "a.asc", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::write(sub.join("c.TIF"), "").unwrap();

        let files = collect_input_files(dir.path()).unwrap();
        let names: Vec<PathBuf> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.asc"),
                PathBuf::from("b.tif"),
                PathBuf::from("suit100m/c.TIF"),
            ]
        );
    }

    #[test]
    fn join_refuses_existing_output_before_reading_config() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("point_data.csv");
        fs::write(&output, "x,y,z\n").unwrap();

        let err = run_join(
            &dir.path().join("missing.yaml"),
            &output,
            None,
            false,
            false,
            GdalRasterSource::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn cli_parses_join_flags() {
        let args = Args::parse_from([
            "raster-stack",
            "--nodata",
            "-9999",
            "join",
            "stack.yaml",
            "-o",
            "out.csv",
            "--force",
        ]);
        assert_eq!(args.nodata, Some(-9999.0));
        match args.command {
            Command::Join { force, strict, .. } => {
                assert!(force);
                assert!(!strict);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
