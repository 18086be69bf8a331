use anyhow::Result;
use clap::Parser;
use ipod_sync::diff::SyncPlan;
use ipod_sync::{SyncConfig, SyncPipeline};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ipod-sync")]
#[command(about = "Sync a music library onto an iPod Classic/Nano", long_about = None)]
struct Args {
    /// Path to the music library root
    #[arg(short = 'l', long, default_value = "~/Music")]
    library: String,

    /// Device mount point
    #[arg(short = 'm', long)]
    mount: PathBuf,

    /// Compute and print the plan without executing it
    #[arg(long)]
    plan_only: bool,

    /// Write ratings and play counts back to the PC files
    #[arg(long)]
    write_back: bool,

    /// AAC bitrate in kbps for transcoded lossy sources
    #[arg(long, default_value = "256")]
    bitrate: u32,

    /// Transcode cache directory (reused across runs)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let library = shellexpand::tilde(&args.library);
    let mut config = SyncConfig::new(args.mount.clone(), PathBuf::from(library.as_ref()))
        .with_write_back(args.write_back)
        .with_bitrate(args.bitrate);
    if let Some(cache_dir) = args.cache_dir {
        config = config.with_cache_dir(cache_dir);
    }

    let pipeline = SyncPipeline::new(config);

    if args.plan_only {
        let prepared = pipeline.prepare()?;
        print_plan(&prepared.plan);
        return Ok(());
    }

    let report = pipeline.run()?;

    log::info!("Sync completed successfully!");
    log::info!(
        "  added {}, removed {}, files updated {}",
        report.added,
        report.removed,
        report.files_updated
    );
    log::info!(
        "  metadata {}, artwork {}, play counts {}, ratings {}",
        report.metadata_updated,
        report.artwork_updated,
        report.play_counts_synced,
        report.ratings_synced
    );
    for err in &report.soft_errors {
        log::warn!("  skipped: {}", err);
    }

    Ok(())
}

fn print_plan(plan: &SyncPlan) {
    println!("Planned actions:");
    println!("  add:        {}", plan.adds.len());
    println!("  remove:     {}", plan.removes.len());
    println!("  file:       {}", plan.file_updates.len());
    println!("  metadata:   {}", plan.metadata_updates.len());
    println!("  artwork:    {}", plan.artwork_updates.len());
    println!("  plays:      {}", plan.play_count_syncs.len());
    println!("  ratings:    {}", plan.rating_syncs.len());
    println!();
    println!(
        "Storage: +{} -{} bytes (net {:+})",
        plan.storage.bytes_to_add, plan.storage.bytes_to_remove, plan.storage.net_change
    );

    if plan.integrity.fix_count() > 0 {
        println!();
        println!(
            "Integrity fixes: {} missing file(s), {} stale mapping(s), {} orphan(s) removed",
            plan.integrity.missing_files.len(),
            plan.integrity.stale_mappings.len(),
            plan.integrity.orphans_removed.len()
        );
    }
    if !plan.duplicate_groups.is_empty() {
        println!();
        println!("True duplicates (skipped):");
        for group in &plan.duplicate_groups {
            println!("  {} == {:?}", group.canonical, group.duplicates);
        }
    }
    if !plan.unresolved_collisions.is_empty() {
        println!();
        println!("Unresolved collisions (no action taken):");
        for line in &plan.unresolved_collisions {
            println!("  {}", line);
        }
    }
    if !plan.fingerprint_errors.is_empty() {
        println!();
        println!("Fingerprint failures (files skipped):");
        for line in &plan.fingerprint_errors {
            println!("  {}", line);
        }
    }
    if !plan.missing_artwork.is_empty() {
        println!();
        println!(
            "{} track(s) missing artwork; ArtworkDB will be rewritten",
            plan.missing_artwork.len()
        );
    }
}
