use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    time::Instant,
};
use tile_model::instance::{tile_directory, tile_file_stem};
use tile_model::{DVec3, PointCloudTileContents, Scale3D, TileContents, TileIndex, TileMessage, UtmZone};
use walkdir::WalkDir;

#[derive(Parser, Debug, Clone)]
#[command(name = "xyz2utmt", version)]
struct Args {
    /// Directory searched recursively for `.xyz`, `.txt` and `.pts` files.
    #[arg(long, default_value = "xyz")]
    input_dir: String,

    /// Tile root; tiles land in `<output-dir>/<layer-id>/<scale>/`.
    #[arg(long, default_value = "tiles")]
    output_dir: String,

    #[arg(long, default_value = "base1")]
    layer_id: String,

    /// Tile dimensions in metres.
    #[arg(long, default_value = "_010_010_010")]
    scale: Scale3D,

    /// UTM zone the input coordinates are in.
    #[arg(long, default_value = "10N")]
    utm_zone: UtmZone,

    /// zlib-compress the point payload.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    compress: bool,

    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

/// One input record: UTM position in metres and linear RGB in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
struct XyzPoint {
    position: [f64; 3],
    color: [f32; 3],
}

fn collect_inputs(input_dir: &str) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let ext = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_default();
            matches!(ext.as_str(), "xyz" | "txt" | "pts")
        })
        .collect();

    inputs.sort();
    inputs
}

/// `x y z [r g b]` per line, whitespace or comma separated. Colors are 0..=255.
fn parse_xyz<R: Read>(reader: R) -> Result<Vec<XyzPoint>> {
    let mut points = Vec::new();

    for (line_no, line_result) in BufReader::new(reader).lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        let fields = trimmed
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Line {}: not a number", line_no + 1))?;

        let color = match fields.len() {
            3 => [1.0; 3],
            6 => [
                (fields[3] / 255.0) as f32,
                (fields[4] / 255.0) as f32,
                (fields[5] / 255.0) as f32,
            ],
            n => bail!("Line {}: expected 3 or 6 values, got {n}", line_no + 1),
        };

        let position = [fields[0], fields[1], fields[2]];
        if position.iter().all(|v| v.is_finite()) {
            points.push(XyzPoint { position, color });
        }
    }

    Ok(points)
}

fn bucket_points(points: Vec<XyzPoint>, scale: Scale3D) -> Result<HashMap<TileIndex, Vec<XyzPoint>>> {
    let mut buckets: HashMap<TileIndex, Vec<XyzPoint>> = HashMap::new();

    for point in points {
        let index = TileIndex::from_point(scale, DVec3::from_array(point.position))?;
        buckets.entry(index).or_default().push(point);
    }

    Ok(buckets)
}

/// Write one tile. Positions are stored relative to the tile origin.
/// Returns `None` when the tile exists and `--overwrite` is off.
fn write_tile(args: &Args, index: TileIndex, points: &[XyzPoint]) -> Result<Option<PathBuf>> {
    let dir = tile_directory(Path::new(&args.output_dir), &args.layer_id, index.scale());
    let out_path = dir.join(format!("{}.{}", tile_file_stem(&index), utmt::UTMT_EXTENSION));

    if out_path.exists() && !args.overwrite {
        return Ok(None);
    }

    let origin = index.origin();
    let mut positions = Vec::with_capacity(points.len() * 3);
    let mut colors = Vec::with_capacity(points.len() * 3);
    for point in points {
        let offset = DVec3::from_array(point.position) - origin;
        positions.extend_from_slice(&offset.as_vec3().to_array());
        colors.extend_from_slice(&point.color);
    }

    let contents = PointCloudTileContents::new(positions, colors)?;
    let msg = TileMessage::new(origin, args.utm_zone, TileContents::PointCloud(contents));

    fs::create_dir_all(&dir)?;
    utmt::write_file(&out_path, &msg.to_record()?, args.compress)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    Ok(Some(out_path))
}

fn read_points(inputs: &[PathBuf]) -> Vec<XyzPoint> {
    inputs
        .par_iter()
        .filter_map(|path| {
            let parsed = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))
                .and_then(parse_xyz);

            match parsed {
                Ok(points) => {
                    if points.is_empty() {
                        warn!("{}: no points", path.display());
                    }
                    Some(points)
                }
                Err(err) => {
                    warn!("Error reading {}: {:#}", path.display(), err);
                    None
                }
            }
        })
        .flatten()
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let started = Instant::now();

    let inputs = collect_inputs(&args.input_dir);
    info!("Reading {} input files...", inputs.len());

    let points = read_points(&inputs);
    let point_count = points.len();
    let buckets = bucket_points(points, args.scale)?;
    info!("{} points fall into {} tiles", point_count, buckets.len());

    let results: Vec<(TileIndex, Result<Option<PathBuf>>)> = buckets
        .par_iter()
        .map(|(index, points)| (*index, write_tile(&args, *index, points)))
        .collect();

    let (mut written, mut skipped, mut failed) = (0usize, 0usize, 0usize);
    for (index, result) in results {
        match result {
            Ok(Some(_)) => written += 1,
            Ok(None) => skipped += 1,
            Err(err) => {
                failed += 1;
                warn!("Error writing tile {}: {:#}", index, err);
            }
        }
    }

    info!(
        "Wrote {} tiles ({} existing skipped, {} failed) in {:.2?}",
        written,
        skipped,
        failed,
        started.elapsed()
    );

    if failed > 0 {
        bail!("{failed} tiles failed to write");
    }
    Ok(())
}
