use clap::{Parser, Subcommand};
use flowcache::container;
use flowcache::error::CacheResult;
use flowcache::paths::CacheStage;
use flowcache::registry::SolverRegistry;
use flowcache::settings::CacheSettings;
use flowcache::tracker::FluidCache;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "flowcache", about = "Inspect and maintain fluid simulation caches")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the header of a cache file
    Inspect {
        /// Cache file (.uni container or .svol volume)
        file: PathBuf,
    },
    /// Report which stages are cached for one frame
    Probe {
        /// Cache root directory
        #[arg(long)]
        root: PathBuf,
        /// Frame number
        #[arg(long, allow_hyphen_values = true)]
        frame: i32,
        /// Cache settings JSON (defaults are used when absent)
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Probe guiding velocities in the domain's own data stage
        #[arg(long)]
        source_domain: bool,
    },
    /// Delete every file of one stage
    Clear {
        /// Cache root directory
        #[arg(long)]
        root: PathBuf,
        /// Stage: config, data, noise, mesh, particles, guide or script
        #[arg(long)]
        stage: CacheStage,
    },
}

#[cfg(feature = "sparse")]
fn inspect_sparse(file: &Path) -> Option<CacheResult<()>> {
    if !file.to_string_lossy().ends_with(flowcache::paths::EXT_SPARSE) {
        return None;
    }
    let volume = match flowcache::sparse::SparseVolume::read(file) {
        Ok(volume) => volume,
        Err(error) => return Some(Err(error)),
    };
    for field in &volume.fields {
        println!(
            "{} {:?} {:?}: {} leaves, {} active voxels",
            field.name,
            field.kind,
            field.resolution,
            field.leaf_count(),
            field.active_voxel_count()
        );
    }
    Some(Ok(()))
}

#[cfg(not(feature = "sparse"))]
fn inspect_sparse(_file: &Path) -> Option<CacheResult<()>> {
    None
}

fn inspect(file: &Path) -> CacheResult<()> {
    if let Some(result) = inspect_sparse(file) {
        return result;
    }

    let header = container::inspect(file)?;
    println!("magic:             {}", String::from_utf8_lossy(&header.magic.bytes()));
    println!("elements:          {}", header.element_count);
    println!("dims:              {:?}", header.dims);
    println!("element type:      {}", header.element_type);
    println!("bytes per element: {}", header.bytes_per_element);
    println!("extra:             {}", header.extra);
    println!("info:              {}", header.info);
    println!("timestamp (us):    {}", header.timestamp);
    Ok(())
}

/// Command-line roots are relative to the working directory, not to a host
/// document.
fn absolute_root(root: PathBuf) -> PathBuf {
    std::path::absolute(&root).unwrap_or(root)
}

fn probe(
    root: PathBuf,
    frame: i32,
    settings: Option<PathBuf>,
    source_domain: bool,
) -> CacheResult<()> {
    let settings = settings
        .as_deref()
        .and_then(CacheSettings::load)
        .unwrap_or_default();
    let mut registry = SolverRegistry::new();
    let cache = FluidCache::new(registry.allocate(), absolute_root(root), settings);
    let report = [
        ("config", cache.has_config(frame)),
        ("data", cache.has_data(frame)),
        ("noise", cache.has_noise(frame)),
        ("mesh", cache.has_mesh(frame)),
        ("particles", cache.has_particles(frame)),
        ("flip", cache.has_flip(frame)),
        ("guiding", cache.has_guiding(frame, source_domain)),
    ];
    for (stage, present) in report {
        println!("{stage:<10} {}", if present { "cached" } else { "-" });
    }
    Ok(())
}

fn clear(root: PathBuf, stage: CacheStage) -> CacheResult<()> {
    let mut registry = SolverRegistry::new();
    let mut cache = FluidCache::new(
        registry.allocate(),
        absolute_root(root),
        CacheSettings::default(),
    );
    cache.clear_stage(stage)?;
    println!("Cleared {stage} stage in {}", cache.root().display());
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Inspect { file } => inspect(&file),
        Command::Probe {
            root,
            frame,
            settings,
            source_domain,
        } => probe(root, frame, settings, source_domain),
        Command::Clear { root, stage } => clear(root, stage),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
