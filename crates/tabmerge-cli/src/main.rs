//! tabmerge CLI
//!
//! Command-line tool for analysing, merging and synchronising folders of spreadsheets.

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, LevelFilter};
use std::env;
use std::path::{Path, PathBuf};
use tabmerge_core::pipeline::{FieldsAnalyzed, RunReport};
use tabmerge_core::{
    parse_file, ConflictPolicy, Error, FieldPair, Loaded, LoadOptions, MatchingConfig,
    MergeConfig, SyncConfig, UpdateMode, WriteOptions,
};

#[derive(Parser)]
#[command(name = "tabmerge")]
#[command(about = "Reconcile, merge and sync spreadsheet folders", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which columns across a folder mean the same field
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Print the field report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge every table carrying the required fields into one output file
    Merge {
        #[command(flatten)]
        input: InputArgs,

        /// Output file (.csv or .xlsx)
        #[arg(short, long)]
        output: PathBuf,

        /// Merge config (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Required field (repeatable)
        #[arg(short, long)]
        required: Vec<String>,

        /// Output field, in order (repeatable)
        #[arg(short, long)]
        field: Vec<String>,

        /// Keep duplicate records
        #[arg(long)]
        no_dedup: bool,

        /// Dedup key field (repeatable)
        #[arg(long)]
        dedup_key: Vec<String>,

        /// What to do when duplicates disagree
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictArg>,

        /// Text written where a table lacks an output field
        #[arg(long)]
        missing_fill: Option<String>,

        /// Add a column with each record's full source path
        #[arg(long)]
        source_path_column: Option<String>,

        /// Pick variant CHOICE for deferred conflict CONFLICT (CONFLICT=CHOICE, repeatable)
        #[arg(long)]
        resolve: Vec<String>,

        #[command(flatten)]
        output_args: OutputArgs,
    },

    /// Fill or overwrite fields of a target table from keyed source tables
    Sync {
        #[command(flatten)]
        input: InputArgs,

        /// Target table
        #[arg(short, long)]
        target: PathBuf,

        /// Output file (.csv or .xlsx)
        #[arg(short, long)]
        output: PathBuf,

        /// Sync config (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Key pair TARGET=SOURCE, or one name for both sides (repeatable)
        #[arg(short, long)]
        key: Vec<String>,

        /// Field pair TARGET=SOURCE, or one name for both sides (repeatable)
        #[arg(short, long)]
        field: Vec<String>,

        /// Update mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Text treated as an empty target cell (repeatable)
        #[arg(long)]
        empty_marker: Vec<String>,

        #[command(flatten)]
        output_args: OutputArgs,
    },

    /// Write a default config file to edit
    InitConfig {
        #[arg(value_enum)]
        kind: ConfigKind,

        /// Output path for the config file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Folder holding the spreadsheets
    #[arg(short = 'd', long)]
    folder: PathBuf,

    /// Descend into subfolders
    #[arg(long)]
    recursive: bool,

    /// Variant table (JSON) replacing the built-in one
    #[arg(long)]
    variants: Option<PathBuf>,

    /// Fuzzy match threshold in (0, 1]
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Args)]
struct OutputArgs {
    /// Replace the output file if it exists
    #[arg(long)]
    overwrite: bool,

    /// Add a summary sheet (xlsx output)
    #[arg(long)]
    summary: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConflictArg {
    KeepFirst,
    PromptCaller,
    EmitAllVariants,
    SkipConflicting,
    MostFrequent,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::KeepFirst => ConflictPolicy::KeepFirst,
            ConflictArg::PromptCaller => ConflictPolicy::PromptCaller,
            ConflictArg::EmitAllVariants => ConflictPolicy::EmitAllVariants,
            ConflictArg::SkipConflicting => ConflictPolicy::SkipConflicting,
            ConflictArg::MostFrequent => ConflictPolicy::MostFrequent,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    FillMissingOnly,
    OverwriteAlways,
}

impl From<ModeArg> for UpdateMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::FillMissingOnly => UpdateMode::FillMissingOnly,
            ModeArg::OverwriteAlways => UpdateMode::OverwriteAlways,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ConfigKind {
    Merge,
    Sync,
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if env::var("RUST_LOG").is_err() {
        builder
            .filter_module("tabmerge_core", LevelFilter::Info)
            .filter_module("tabmerge", LevelFilter::Info);
    }
    let _ = builder.format_timestamp_millis().try_init();
}

fn run() -> tabmerge_core::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { input, json } => cmd_analyze(&input, json),
        Commands::Merge {
            input,
            output,
            config,
            required,
            field,
            no_dedup,
            dedup_key,
            on_conflict,
            missing_fill,
            source_path_column,
            resolve,
            output_args,
        } => {
            let mut config = match config {
                Some(path) => MergeConfig::load(path)?,
                None => MergeConfig::default(),
            };
            if !required.is_empty() {
                config.required_fields = required;
            }
            if !field.is_empty() {
                config.fields = field;
            }
            if no_dedup {
                config.deduplicate = false;
            }
            if !dedup_key.is_empty() {
                config.dedup_key = dedup_key;
            }
            if let Some(policy) = on_conflict {
                config.on_conflict = policy.into();
            }
            if missing_fill.is_some() {
                config.missing_fill = missing_fill;
            }
            if source_path_column.is_some() {
                config.source_path_column = source_path_column;
            }
            override_matching(&mut config.matching, &input);
            cmd_merge(&input, &output, &config, &resolve, &output_args)
        }
        Commands::Sync {
            input,
            target,
            output,
            config,
            key,
            field,
            mode,
            empty_marker,
            output_args,
        } => {
            let mut config = match config {
                Some(path) => SyncConfig::load(path)?,
                None => SyncConfig::default(),
            };
            if !key.is_empty() {
                config.key_mapping = parse_pairs(&key)?;
            }
            if !field.is_empty() {
                config.field_mapping = parse_pairs(&field)?;
            }
            if let Some(mode) = mode {
                config.update_mode = mode.into();
            }
            if !empty_marker.is_empty() {
                config.empty_markers = empty_marker;
            }
            override_matching(&mut config.matching, &input);
            cmd_sync(&input, &target, &output, &config, &output_args)
        }
        Commands::InitConfig { kind, output } => cmd_init_config(kind, &output),
    }
}

fn override_matching(matching: &mut MatchingConfig, input: &InputArgs) {
    if input.variants.is_some() {
        matching.variants_file = input.variants.clone();
    }
    if let Some(threshold) = input.threshold {
        matching.fuzzy_threshold = threshold;
    }
}

/// Parse `TARGET=SOURCE` pairs; a bare name maps to itself
fn parse_pairs(specs: &[String]) -> tabmerge_core::Result<Vec<FieldPair>> {
    specs
        .iter()
        .map(|spec| match spec.split_once('=') {
            Some((target, source)) if !target.trim().is_empty() && !source.trim().is_empty() => {
                Ok(FieldPair::new(target.trim(), source.trim()))
            }
            Some(_) => Err(Error::InvalidConfig(format!("malformed field pair '{spec}'"))),
            None => Ok(FieldPair::new(spec.trim(), spec.trim())),
        })
        .collect()
}

/// Parse `CONFLICT=CHOICE` resolutions
fn parse_resolutions(specs: &[String]) -> tabmerge_core::Result<Vec<(usize, usize)>> {
    specs
        .iter()
        .map(|spec| {
            spec.split_once('=')
                .and_then(|(c, v)| Some((c.trim().parse().ok()?, v.trim().parse().ok()?)))
                .ok_or_else(|| Error::InvalidConfig(format!("malformed resolution '{spec}'")))
        })
        .collect()
}

fn load(
    input: &InputArgs,
    matching: &MatchingConfig,
    exclude: Vec<PathBuf>,
) -> tabmerge_core::Result<FieldsAnalyzed> {
    let options = LoadOptions {
        recursive: input.recursive,
        exclude,
    };
    let loaded = Loaded::from_folder(&input.folder, &options, matching.matcher()?)?;
    Ok(loaded.analyze())
}

fn cmd_analyze(input: &InputArgs, json: bool) -> tabmerge_core::Result<()> {
    let mut matching = MatchingConfig::default();
    override_matching(&mut matching, input);
    let analyzed = load(input, &matching, Vec::new())?;
    let report = analyzed.report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_loaded(&report);
    println!();
    println!("Fields ({}), most common first:", report.fields.fields.len());
    for stat in report.fields.by_frequency() {
        let marker = if stat.low_confidence { " [fuzzy]" } else { "" };
        println!(
            "  {} ({}/{} tables){}",
            stat.name, stat.table_count, report.fields.table_count, marker
        );
        for member in &stat.members {
            println!("    {}: {} ({:?})", member.source_id, member.column, member.confidence);
        }
    }
    println!();
    println!("Common fields: {}", report.fields.common_fields().join(", "));

    Ok(())
}

fn cmd_merge(
    input: &InputArgs,
    output: &Path,
    config: &MergeConfig,
    resolve: &[String],
    output_args: &OutputArgs,
) -> tabmerge_core::Result<()> {
    let resolutions = parse_resolutions(resolve)?;
    let analyzed = load(input, &config.matching, vec![output.to_path_buf()])?;

    let mut merged = analyzed.select(&config.required_fields).merge(config)?;
    for (conflict, choice) in resolutions {
        debug!("resolving conflict #{} with variant #{}", conflict, choice);
        merged = merged.resolve(conflict, choice)?;
    }

    let written = merged.write(output, &write_options(output_args))?;
    print_report(&written.report, output_args.json)
}

fn cmd_sync(
    input: &InputArgs,
    target: &Path,
    output: &Path,
    config: &SyncConfig,
    output_args: &OutputArgs,
) -> tabmerge_core::Result<()> {
    config.validate()?;
    let target_table = parse_file(target)?;
    let analyzed = load(
        input,
        &config.matching,
        vec![target.to_path_buf(), output.to_path_buf()],
    )?;

    let source_keys: Vec<String> = config.key_mapping.iter().map(|p| p.source.clone()).collect();
    let synced = analyzed.select(&source_keys).sync(&target_table, config)?;

    let written = synced.write(output, &write_options(output_args))?;
    print_report(&written.report, output_args.json)
}

fn cmd_init_config(kind: ConfigKind, output: &Path) -> tabmerge_core::Result<()> {
    match kind {
        ConfigKind::Merge => MergeConfig::default().save(output)?,
        ConfigKind::Sync => SyncConfig::default().save(output)?,
    }
    println!("Created config: {}", output.display());
    Ok(())
}

fn write_options(args: &OutputArgs) -> WriteOptions {
    let summary = if args.summary {
        vec![("tabmerge".to_string(), env!("CARGO_PKG_VERSION").to_string())]
    } else {
        Vec::new()
    };
    WriteOptions {
        overwrite: args.overwrite,
        summary,
    }
}

fn print_loaded(report: &RunReport) {
    println!("Loaded {} table(s):", report.loaded.len());
    for source in &report.loaded {
        println!("  {}", source);
    }
    if !report.failures.is_empty() {
        println!("Failed to load {} file(s):", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.source_id, failure.message);
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> tabmerge_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    print_loaded(report);

    if let Some(selection) = &report.selection {
        for exclusion in &selection.excluded {
            println!("Excluded {}", exclusion);
        }
    }

    if let Some(merge) = &report.merge {
        println!();
        println!("Merged {} table(s)", merge.tables.len());
        println!("  rows read:         {}", merge.rows_read);
        println!("  rows emitted:      {}", merge.rows_emitted);
        println!("  duplicates merged: {}", merge.duplicates_merged);
        println!("  conflicts flagged: {}", merge.conflicts_flagged);
        if merge.rows_skipped > 0 {
            println!("  rows skipped:      {}", merge.rows_skipped);
        }
        for field in &merge.fields {
            if field.expanded {
                println!("  '{}' expanded to '{}'", field.requested, field.name);
            } else if field.low_confidence() {
                println!("  '{}' matched only fuzzily", field.requested);
            }
        }
        for name in &merge.unresolved_fields {
            println!("  no table has field '{}'", name);
        }
        for (i, conflict) in merge.conflicts.iter().enumerate() {
            println!(
                "  conflict #{} key [{}] fields [{}] -> {:?}",
                i,
                conflict.key.join(", "),
                conflict.fields.join(", "),
                conflict.resolution
            );
            for (v, variant) in conflict.variants.iter().enumerate() {
                let values: Vec<String> = variant.values.iter().map(|c| c.to_string()).collect();
                println!(
                    "    #{} [{}] from {}",
                    v,
                    values.join(", "),
                    variant.sources.join(", ")
                );
            }
        }
    }

    if let Some(sync) = &report.sync {
        println!();
        println!("Synced {} from {} source(s)", sync.target, sync.sources.len());
        println!("  rows matched:   {}/{}", sync.rows_matched, sync.rows_total);
        println!("  rows unmatched: {}", sync.unmatched_rows);
        for field in &sync.fields {
            match &field.target_column {
                Some(column) => println!(
                    "  {} <- {}: {} updated",
                    column, field.source, field.rows_updated
                ),
                None => println!("  {}: no such column in target", field.target),
            }
        }
        for key in &sync.missing_target_keys {
            println!("  target has no key field '{}'", key);
        }
        for exclusion in &sync.excluded_sources {
            println!("  excluded source {}", exclusion);
        }
        for (source, field) in &sync.unsupplied_fields {
            println!("  {} has no field '{}'", source, field);
        }
        for collision in &sync.key_collisions {
            println!(
                "  key [{}] from {} replaced by {}",
                collision.key.join(", "),
                collision.previous,
                collision.replaced_by
            );
        }
    }

    if let Some(path) = &report.output {
        println!();
        println!("Wrote {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&["学号".to_string(), "成绩=分数".to_string()]).unwrap();
        assert_eq!(pairs[0], FieldPair::new("学号", "学号"));
        assert_eq!(pairs[1], FieldPair::new("成绩", "分数"));
        assert!(parse_pairs(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_parse_resolutions() {
        assert_eq!(parse_resolutions(&["0=1".to_string()]).unwrap(), vec![(0, 1)]);
        assert!(parse_resolutions(&["zero=1".to_string()]).is_err());
    }
}
