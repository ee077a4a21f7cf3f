//! Trajectory files exposed as foreign point clouds
//!
//! Only the foreign server, table and view are created; `import-sbet`
//! also describes the platform session and the INS transfos.

use anyhow::{Context, Result};
use clap::Args;
use li3ds_core::{Backend, Collection, Store};
use tracing::info;

use super::foreignpc::{Driver, ForeignTable, PointCloudArgs};

#[derive(Args, Debug, Clone)]
pub struct TrajectoryArgs {
    #[command(flatten)]
    pub pointcloud: PointCloudArgs,

    /// SRID of the trajectory coordinates
    #[arg(short = 'r', long, default_value_t = 4326)]
    pub srid: i64,

    /// Data file names, may be patterns (e.g. *.sbet)
    #[arg(required = true)]
    pub patterns: Vec<String>,
}

pub fn read(args: &TrajectoryArgs) -> Result<Collection> {
    let mut collection = Collection::new();
    for path in args.pointcloud.matching(&args.patterns)? {
        info!("Importing {}", path.display());
        let mut table = ForeignTable::new(Driver::Sbet, &args.pointcloud, &path);
        table.srid = Some(args.srid);
        let view = table
            .view(None, None)
            .with_context(|| format!("importing {}", path.display()))?;
        collection.add(view);
    }
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &TrajectoryArgs) -> Result<()> {
    let collection = read(args)?;
    super::publish(store, &collection, &args.pointcloud.chdir.display().to_string())
}
