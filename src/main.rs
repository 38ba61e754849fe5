use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use shelfmark::db::models::{FolderId, Location, PlayState, Quota, SortStrategy};
use shelfmark::organiser::{
    LocateQuery, LocationChange, LocationPatch, Organiser, QuotaQuery,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shelfmark", version, about = "Record shelf organiser")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Record catalog base URL (overrides config)
    #[arg(long, global = true)]
    catalog_url: Option<String>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortName {
    #[value(alias = "label")]
    LabelCatno,
    DateAdded,
    ReleaseDate,
    MoveTime,
    LastListen,
    FolderThenDate,
    #[value(alias = "iid")]
    Instance,
}

impl SortName {
    fn strategy(self) -> SortStrategy {
        match self {
            Self::LabelCatno => SortStrategy::ByLabelCatno,
            Self::DateAdded => SortStrategy::ByDateAdded,
            Self::ReleaseDate => SortStrategy::ByReleaseDate,
            Self::MoveTime => SortStrategy::ByMoveTime,
            Self::LastListen => SortStrategy::ByLastListen,
            Self::FolderThenDate => SortStrategy::ByFolderThenDate,
            Self::Instance => SortStrategy::ByIid,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PlayName {
    InPlay,
    OutOfPlay,
}

/// At most one quota flag may be given.
#[derive(Args)]
struct QuotaArgs {
    /// Quota: highest slot allowed
    #[arg(long)]
    max_slots: Option<i32>,

    /// Quota: width budget per slot (also the packing budget)
    #[arg(long)]
    slot_width: Option<f32>,

    /// Quota: total width allowed across the location
    #[arg(long)]
    absolute_width: Option<f32>,

    /// Quota (legacy): number of records allowed
    #[arg(long)]
    max_records: Option<i32>,
}

impl QuotaArgs {
    fn quota(&self) -> Result<Option<Quota>> {
        let given: Vec<Quota> = [
            self.max_slots.map(|slots| Quota::Slots { slots }),
            self.slot_width.map(|width| Quota::SlotWidth { width }),
            self.absolute_width.map(|width| Quota::AbsoluteWidth { width }),
            self.max_records.map(|count| Quota::NumOfSlots { count }),
        ]
        .into_iter()
        .flatten()
        .collect();
        if given.len() > 1 {
            anyhow::bail!("Give at most one of --max-slots, --slot-width, --absolute-width, --max-records");
        }
        Ok(given.into_iter().next())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List locations
    List,

    /// Show the layout of one or more locations
    Get {
        /// Location names (all when omitted)
        names: Vec<String>,

        /// Reorganise from the catalog before showing
        #[arg(long)]
        force: bool,

        /// Mark the locations as physically reorganised now
        #[arg(long)]
        reset: bool,

        /// Only show this slot
        #[arg(long)]
        slot: Option<i32>,
    },

    /// Add a location and lay it out
    Add {
        name: String,

        /// Source folders, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        folders: Vec<FolderId>,

        /// Number of slots
        #[arg(long, default_value = "1")]
        slots: i32,

        #[arg(long, value_enum, default_value = "label-catno")]
        sort: SortName,

        #[command(flatten)]
        quota: QuotaArgs,

        /// Pack runs of the same label as one unit
        #[arg(long)]
        combine_similar: bool,

        /// Pull narrower records forward to fill a slot
        #[arg(long)]
        allow_adjust: bool,

        /// Hours between expected manual reorganisations
        #[arg(long, default_value = "0")]
        reorg_hours: i64,
    },

    /// Change a location's settings
    Update {
        name: String,

        /// Additional source folders, comma separated
        #[arg(long, value_delimiter = ',')]
        folders: Vec<FolderId>,

        /// Set a folder's priority, as FOLDER:ORDER
        #[arg(long, value_parser = parse_folder_order)]
        order: Vec<(FolderId, i32)>,

        /// Force a slot break before this folder's records
        #[arg(long)]
        hard_gap: Vec<FolderId>,

        #[arg(long)]
        slots: Option<i32>,

        #[arg(long, value_enum)]
        sort: Option<SortName>,

        #[command(flatten)]
        quota: QuotaArgs,

        #[arg(long)]
        combine_similar: Option<bool>,

        #[arg(long)]
        allow_adjust: Option<bool>,

        #[arg(long)]
        spill_folder: Option<FolderId>,

        #[arg(long)]
        no_alert: Option<bool>,

        #[arg(long, value_enum)]
        play: Option<PlayName>,

        #[arg(long)]
        reorg_hours: Option<i64>,
    },

    /// Delete a location
    Delete { name: String },

    /// Find the location holding a record or tracking a folder
    Locate {
        /// Record instance id
        #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
        id: Option<i32>,

        #[arg(long)]
        folder: Option<FolderId>,
    },

    /// Check a location against its quota
    Quota {
        /// Location name
        #[arg(long, required_unless_present = "folder")]
        name: Option<String>,

        /// Or any folder the location tracks
        #[arg(long)]
        folder: Option<FolderId>,

        /// List the counted records
        #[arg(long)]
        list: bool,
    },

    /// Register a catalogue-number extractor for a label
    Extractor {
        label_id: i32,

        /// Regex; the first capture group of every match becomes a sort token
        pattern: String,
    },

    /// Show the sort cache, or one entry
    Cache {
        #[arg(long)]
        id: Option<i32>,
    },

    /// Re-place a record after it changed folder
    ClientUpdate { id: i32 },

    /// Raise reorganisation reminders
    Check,
}

fn parse_folder_order(s: &str) -> Result<(FolderId, i32), String> {
    let (folder, order) = s
        .split_once(':')
        .ok_or_else(|| format!("expected FOLDER:ORDER, got {s}"))?;
    let folder = folder.trim().parse().map_err(|e| format!("bad folder: {e}"))?;
    let order = order.trim().parse().map_err(|e| format!("bad order: {e}"))?;
    Ok((folder, order))
}

fn print_location(loc: &Location, slot: Option<i32>) {
    let quota = loc
        .quota
        .map(|q| format!("{q:?}"))
        .unwrap_or_else(|| "none".to_string());
    println!(
        "{}: folders {:?}, {} slots, quota {}",
        loc.name, loc.folder_ids, loc.slots, quota
    );

    let mut current = 0;
    for p in &loc.releases_location {
        if slot.is_some_and(|s| s != p.slot) {
            continue;
        }
        if p.slot != current {
            current = p.slot;
            println!("  Slot {current}");
        }
        println!(
            "    {:>3}. {:<50} {:>10} {:>6.1}mm",
            p.index,
            truncate(&p.title, 50),
            p.instance_id,
            p.determined_width
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = shelfmark::config::AppConfig::load();
    if let Some(url) = cli.catalog_url {
        config.catalog_url = url;
    }

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(shelfmark::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = shelfmark::db::Database::open(&db_path).context("Failed to open database")?;
    let organiser =
        Organiser::connect(db, &config).context("Failed to start fetch workers")?;

    match cli.command {
        Commands::List => {
            let view = organiser.get_organisation(&[], false, false)?;
            if view.locations.is_empty() {
                println!("No locations configured.");
                return Ok(());
            }
            for loc in &view.locations {
                println!(
                    "{:<24} {:>4} records {:>3} slots  folders {:?}",
                    loc.name,
                    loc.releases_location.len(),
                    loc.max_slot(),
                    loc.folder_ids
                );
            }
        }

        Commands::Get { names, force, reset, slot } => {
            let view = organiser
                .get_organisation(&names, force, reset)
                .context("Failed to read organisation")?;
            if force {
                println!("Reorganised {} units", view.processed);
            }
            for loc in &view.locations {
                print_location(loc, slot);
                println!();
            }
        }

        Commands::Add {
            name,
            folders,
            slots,
            sort,
            quota,
            combine_similar,
            allow_adjust,
            reorg_hours,
        } => {
            let location = Location {
                name,
                folder_ids: folders,
                sort: sort.strategy(),
                slots,
                quota: quota.quota()?,
                combine_similar,
                allow_adjust,
                in_play: PlayState::InPlay,
                reorg_time: reorg_hours * 3600,
                ..Default::default()
            };
            let added = organiser.add_location(location).context("Failed to add location")?;
            print_location(&added, None);
        }

        Commands::Update {
            name,
            folders,
            order,
            hard_gap,
            slots,
            sort,
            quota,
            combine_similar,
            allow_adjust,
            spill_folder,
            no_alert,
            play,
            reorg_hours,
        } => {
            let patch = LocationPatch {
                folder_ids: folders,
                folder_order: order.into_iter().collect(),
                hard_gaps: hard_gap.into_iter().collect(),
                slots,
                sort: sort.map(SortName::strategy),
                quota: quota.quota()?,
                combine_similar,
                allow_adjust,
                spill_folder,
                no_alert,
                in_play: play.map(|p| match p {
                    PlayName::InPlay => PlayState::InPlay,
                    PlayName::OutOfPlay => PlayState::OutOfPlay,
                }),
                reorg_time: reorg_hours.map(|h| h * 3600),
                ..Default::default()
            };
            organiser
                .update_location(&name, LocationChange::Update(patch))
                .context("Failed to update location")?;
            println!("Updated {name}");
        }

        Commands::Delete { name } => {
            organiser
                .update_location(&name, LocationChange::Delete)
                .context("Failed to delete location")?;
            println!("Deleted {name}");
        }

        Commands::Locate { id, folder } => {
            let query = match (id, folder) {
                (Some(id), _) => LocateQuery::Instance(id),
                (None, Some(folder)) => LocateQuery::Folder(folder),
                (None, None) => anyhow::bail!("Give --id or --folder"),
            };
            let loc = organiser.locate(query)?;
            match id.and_then(|i| loc.shelf_neighbours(i)) {
                Some((before, here, after)) => {
                    println!("{} ({}) is in {}", here.title, here.instance_id, loc.name);
                    println!("Slot {}", here.slot);
                    for p in before.into_iter().chain([here]).chain(after) {
                        println!("{:>4}. {} ({})", p.index, p.title, p.instance_id);
                    }
                }
                None => println!("{}", loc.name),
            }
        }

        Commands::Quota { name, folder, list } => {
            let status = organiser.get_quota(&QuotaQuery {
                name,
                folder_id: folder,
                include_records: list,
            })?;
            println!(
                "{}: {} (spill folder {})",
                status.location,
                if status.over_quota { "OVER QUOTA" } else { "within quota" },
                status.spill_folder
            );
            for id in &status.instance_ids {
                println!("  {id}");
            }
        }

        Commands::Extractor { label_id, pattern } => {
            organiser.add_extractor(label_id, &pattern)?;
            println!("Extractor registered for label {label_id}");
        }

        Commands::Cache { id } => match id {
            Some(id) => {
                let entry = organiser.cache_entry(id)?;
                println!("{}", serde_json::to_string_pretty(&entry)?);
            }
            None => {
                let cache = organiser.get_cache()?;
                let updated = organiser
                    .database()
                    .document_updated_at(shelfmark::db::queries::CACHE_KEY)?;
                println!(
                    "{} entries (written {})",
                    cache.len(),
                    updated.as_deref().unwrap_or("never")
                );
                for entry in cache.entries() {
                    println!(
                        "  {:>10} {:>6.1} {:<24} {}",
                        entry.instance_id,
                        entry.width,
                        truncate(&entry.main_label, 24),
                        entry.key(shelfmark::cache::BY_LABEL)
                    );
                }
            }
        },

        Commands::ClientUpdate { id } => match organiser.client_update(id)? {
            Some(moved) => println!(
                "{} moved: {} -> {}",
                moved.instance_id,
                moved.from.as_deref().unwrap_or("none"),
                moved.to.as_deref().unwrap_or("none")
            ),
            None => println!("{id}: no location change"),
        },

        Commands::Check => {
            let raised = organiser.check_org(chrono::Utc::now().timestamp())?;
            println!("{raised} reminders raised");
        }
    }

    Ok(())
}
