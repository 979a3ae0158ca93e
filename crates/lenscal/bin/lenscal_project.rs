//! Camera model projection tool
//!
//! Reads a camera model file and projects 3D points to pixels, or unprojects
//! pixels to observation directions.
//!
//! # Usage
//! ```bash
//! # Points in the camera frame, three coordinates each
//! lenscal-project camera.cameramodel 0.1 -0.2 2.0  0.3 0.0 1.5
//!
//! # Points in the reference frame
//! lenscal-project camera.cameramodel --from-reference 0.1 -0.2 2.0
//!
//! # Pixels, two coordinates each; unit-length directions as JSON
//! lenscal-project camera.cameramodel --unproject --normalize --json 320 240
//! ```

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use lenscal::{init_logger, read_cameramodel_file};
use nalgebra::{Vector2, Vector3};
use tracing::info;

/// Project or unproject coordinates through a camera model
#[derive(Parser)]
#[command(name = "lenscal-project")]
#[command(about = "Project points through a camera model, or unproject pixels")]
struct Args {
    /// Camera model file
    #[arg(value_name = "MODEL")]
    model: PathBuf,

    /// Coordinates: x y z per point, or x y per pixel with --unproject
    #[arg(value_name = "COORDS", allow_negative_numbers = true, required = true)]
    coords: Vec<f64>,

    /// Unproject pixels instead of projecting points
    #[arg(short, long)]
    unproject: bool,

    /// Points are given in the reference frame (projection only)
    #[arg(long, conflicts_with = "unproject")]
    from_reference: bool,

    /// Normalize unprojected directions to unit length
    #[arg(long)]
    normalize: bool,

    /// Print results as a JSON array
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logger();

    let model = read_cameramodel_file(&args.model)?;
    info!("Loaded {}: {}", args.model.display(), model.lensmodel());

    let rows: Vec<Vec<f64>> = if args.unproject {
        if args.coords.len() % 2 != 0 {
            return Err(format!("expected x y pairs, got {} values", args.coords.len()).into());
        }
        let pixels: Vec<Vector2<f64>> = args
            .coords
            .chunks_exact(2)
            .map(|c| Vector2::new(c[0], c[1]))
            .collect();
        model
            .unproject(&pixels)?
            .into_iter()
            .map(|v| {
                let v = if args.normalize { v.normalize() } else { v };
                vec![v.x, v.y, v.z]
            })
            .collect()
    } else {
        if args.coords.len() % 3 != 0 {
            return Err(format!("expected x y z triplets, got {} values", args.coords.len()).into());
        }
        let rt_cam_ref = model.extrinsics_rt_fromref();
        let points: Vec<Vector3<f64>> = args
            .coords
            .chunks_exact(3)
            .map(|c| {
                let p = Vector3::new(c[0], c[1], c[2]);
                if args.from_reference {
                    rt_cam_ref.transform_point(&p, None, None)
                } else {
                    p
                }
            })
            .collect();
        model
            .project(&points)?
            .into_iter()
            .map(|q| vec![q.x, q.y])
            .collect()
    };
    info!("{} {}", rows.len(), if args.unproject { "pixels unprojected" } else { "points projected" });

    if args.json {
        println!("{}", serde_json::to_string(&rows)?);
    } else {
        for row in &rows {
            let line: Vec<String> = row.iter().map(|v| format!("{v:.9}")).collect();
            println!("{}", line.join(" "));
        }
    }
    Ok(())
}
