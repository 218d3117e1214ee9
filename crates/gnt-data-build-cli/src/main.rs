// crate-specific lint exceptions:
//#![allow()]

use std::path::PathBuf;

use clap::{AppSettings, Parser, Subcommand};
use gnt_data_build::PackagingOptions;
use gnt_data_offline::{AssetRegistry, MetaFile};

#[derive(Parser, Debug)]
#[clap(name = "gnt-pack")]
#[clap(about = "Garnet archive packaging CLI", version, author)]
#[clap(setting(AppSettings::ArgRequiredElseHelp))]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Package every compiled asset into an archive pair
    #[clap(name = "pack")]
    Pack {
        /// Source tree scanned for meta files.
        #[clap(long)]
        source: PathBuf,
        /// Compiled asset cache directory.
        #[clap(long)]
        cache: PathBuf,
        /// Output directory for the archive pair.
        #[clap(long)]
        out: PathBuf,
        /// File name stem of the emitted archive pair.
        #[clap(long, default_value = "assets")]
        name: String,
        /// Maximum byte size of one content file.
        #[clap(long = "max-archive-size")]
        max_archive_size: Option<u64>,
        /// Build code stamped into the archive headers.
        #[clap(long = "build-code", default_value = "0")]
        build_code: u32,
    },
    /// Remove orphaned assets and their dangling meta files
    #[clap(name = "compact")]
    Compact {
        /// Source tree scanned for meta files.
        #[clap(long)]
        source: PathBuf,
        /// Compiled asset cache directory.
        #[clap(long)]
        cache: PathBuf,
    },
}

fn main() -> Result<(), String> {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();
    match args.command {
        Commands::Pack {
            source,
            cache,
            out,
            name,
            max_archive_size,
            build_code,
        } => {
            let registry = AssetRegistry::new(&cache)
                .map_err(|e| format!("failed opening compiled asset cache: {}", e))?;
            let scanned = registry
                .scan_metafiles(&source)
                .map_err(|e| format!("failed scanning '{}': {}", source.display(), e))?;
            println!("scanned {} meta file(s)", scanned);

            let mut options = PackagingOptions::new(&out)
                .archive_name(&name)
                .build_code(build_code);
            if let Some(max) = max_archive_size {
                options = options.max_content_size(max);
            }

            let mut packager = options.create();
            let output = packager
                .run(&registry)
                .map_err(|e| format!("packaging failed: {}", e))?;
            println!(
                "packaged {} asset(s) into '{}' + {} content file(s)",
                output.asset_count,
                output.directory_file.display(),
                output.content_files.len()
            );
        }
        Commands::Compact { source, cache } => {
            let registry = AssetRegistry::new(&cache)
                .map_err(|e| format!("failed opening compiled asset cache: {}", e))?;
            registry
                .scan_metafiles(&source)
                .map_err(|e| format!("failed scanning '{}': {}", source.display(), e))?;

            let removed = registry.compact();
            for entry in &removed {
                // the sidecar of a deleted source is no longer reachable
                let _ = std::fs::remove_file(MetaFile::metadata_path(&entry.source_path));
                let _ = std::fs::remove_file(registry.compiled_asset_path(entry.id));
            }
            println!("removed {} orphaned asset(s)", removed.len());
        }
    }
    Ok(())
}
