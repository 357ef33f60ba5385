use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use kpigraph_core::{parse_tables_lenient, Config, Diagnostic, QualityReport, RawTable, Severity};
use kpigraph_engine::{read_candidates, CandidateValidation, CandidateValidator, IngestionPipeline, SemanticVerifier};
use kpigraph_extract::KpiExtractor;
use kpigraph_graph::{GraphExport, KpiGraph};

/// Default config file looked up in the working directory
const DEFAULT_CONFIG: &str = "kpigraph.toml";

/// kpigraph - KPI knowledge graphs from financial report tables
#[derive(Parser)]
#[command(name = "kpigraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: kpigraph.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a KPI graph from table files and verify it
    Build {
        /// Table files (.jsonl) or directories containing them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file for the graph export
        #[arg(short, long, default_value = "graph.json")]
        graph: PathBuf,

        /// Output file for the quality report
        #[arg(short, long, default_value = "report.json")]
        report: PathBuf,

        /// Also output markdown report
        #[arg(short, long)]
        markdown: Option<PathBuf>,

        /// Candidate KPI records to validate and ingest alongside the tables
        #[arg(long)]
        candidates: Option<PathBuf>,

        /// Exit with status 1 when the report contains errors
        #[arg(long)]
        strict: bool,
    },

    /// Verify a previously exported graph
    Verify {
        /// Graph export (graph.json)
        graph: PathBuf,

        /// Output file for the quality report
        #[arg(short, long, default_value = "report.json")]
        report: PathBuf,

        /// Also output markdown report
        #[arg(short, long)]
        markdown: Option<PathBuf>,

        /// Exit with status 1 when the report contains errors
        #[arg(long)]
        strict: bool,
    },

    /// Show graph statistics
    Stats {
        /// Graph export (graph.json)
        graph: PathBuf,
    },

    /// Show one time series of the graph
    Series {
        /// Graph export (graph.json)
        graph: PathBuf,

        /// Canonical metric name (e.g. sales_revenue)
        metric: String,

        /// Entity label or key (normalized before lookup)
        entity: String,
    },

    /// Validate candidate KPI records against their source tables
    Candidates {
        /// Table file (.jsonl) or directory
        tables: PathBuf,

        /// Candidate records (JSON array, JSON lines or grouped extraction file)
        candidates: PathBuf,

        /// Output file for validation results
        #[arg(short, long, default_value = "validation.json")]
        output: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        /// Destination (default: kpigraph.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Commands::InitConfig { path, force } = &cli.command {
        return init_config_command(path.as_deref(), *force);
    }

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Build {
            inputs,
            graph,
            report,
            markdown,
            candidates,
            strict,
        } => build_command(
            &config,
            &inputs,
            &graph,
            &report,
            markdown.as_deref(),
            candidates.as_deref(),
            strict,
            cli.verbose,
        ),
        Commands::Verify {
            graph,
            report,
            markdown,
            strict,
        } => verify_command(&config, &graph, &report, markdown.as_deref(), strict, cli.verbose),
        Commands::Stats { graph } => stats_command(&graph),
        Commands::Series { graph, metric, entity } => series_command(&config, &graph, &metric, &entity),
        Commands::Candidates {
            tables,
            candidates,
            output,
        } => candidates_command(&config, &tables, &candidates, &output, cli.verbose),
        Commands::InitConfig { .. } => Ok(()),
    }
}

/// Log to stderr; RUST_LOG wins over the verbosity flag
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = if let Some(config_path) = path {
        Config::from_file(config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else if Path::new(DEFAULT_CONFIG).exists() {
        Config::from_file(Path::new(DEFAULT_CONFIG)).with_context(|| format!("loading {}", DEFAULT_CONFIG))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    if verbose {
        eprintln!(
            "{} {} metrics, {} value rules",
            "Using".cyan(),
            config.taxonomy.metrics.len(),
            config.rules.len()
        );
    }

    Ok(config)
}

/// Expand inputs into table files; directories contribute their *.jsonl files
fn collect_table_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| path.extension().map_or(false, |ext| ext == "jsonl"))
                .collect();
            found.sort();
            files.extend(found);
        } else if input.exists() {
            files.push(input.clone());
        } else {
            return Err(anyhow::anyhow!("Input not found: {}", input.display()));
        }
    }

    Ok(files)
}

/// Read every table, keeping malformed records as diagnostics
fn load_tables(inputs: &[PathBuf], verbose: bool) -> Result<(Vec<RawTable>, Vec<Diagnostic>)> {
    let mut tables = Vec::new();
    let mut unreadable = Vec::new();

    for file in collect_table_files(inputs)? {
        if verbose {
            eprintln!("  {} {}", "Reading".cyan(), file.display());
        }

        let contents = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
        let (parsed, diagnostics) = parse_tables_lenient(&contents, &file.display().to_string());
        tracing::info!(file = %file.display(), tables = parsed.len(), malformed = diagnostics.len(), "read table file");
        tables.extend(parsed);
        unreadable.extend(diagnostics);
    }

    Ok((tables, unreadable))
}

/// Build command - ingest tables, export the graph and verify it
#[allow(clippy::too_many_arguments)]
fn build_command(
    config: &Config,
    inputs: &[PathBuf],
    graph_path: &Path,
    report_path: &Path,
    markdown: Option<&Path>,
    candidates: Option<&Path>,
    strict: bool,
    verbose: bool,
) -> Result<()> {
    let verifier = SemanticVerifier::new(config)?;
    let pipeline = IngestionPipeline::new(config);

    if verbose {
        eprintln!("{}", "Loading tables...".cyan());
    }
    let (tables, unreadable) = load_tables(inputs, verbose)?;

    let mut candidate_diagnostics = Vec::new();
    let extra = match candidates {
        Some(path) => {
            let records = read_candidates(path).with_context(|| format!("reading {}", path.display()))?;
            let validator = CandidateValidator::new(&tables, pipeline.extractor());
            let validation = validator.validate_all(records);
            if verbose {
                print_candidate_summary(&validation);
            }
            candidate_diagnostics.extend(validation.diagnostics().cloned());
            validator.observations(&validation)
        }
        None => Vec::new(),
    };

    if verbose {
        eprintln!("{} {} tables...", "Ingesting".cyan(), tables.len());
    }
    let mut ingestion = pipeline.ingest_with(tables, extra);
    ingestion.record_unreadable(unreadable);
    ingestion.diagnostics.extend(candidate_diagnostics);

    let export = ingestion.graph.to_export();
    export
        .save_to_file(graph_path)
        .with_context(|| format!("writing {}", graph_path.display()))?;
    if verbose {
        eprintln!("{} {}", "Graph saved to:".green(), graph_path.display());
    }

    let report = verifier.verify_ingestion(&ingestion);
    write_report(&report, report_path, markdown, verbose)?;
    print_report_summary(&report);

    if strict && report.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

/// Verify command - re-import an exported graph and verify it
fn verify_command(
    config: &Config,
    graph_path: &Path,
    report_path: &Path,
    markdown: Option<&Path>,
    strict: bool,
    verbose: bool,
) -> Result<()> {
    let verifier = SemanticVerifier::new(config)?;
    let graph = load_graph(graph_path, verbose)?;

    let report = verifier.verify(&graph);
    write_report(&report, report_path, markdown, verbose)?;
    print_report_summary(&report);

    if strict && report.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

fn load_graph(path: &Path, verbose: bool) -> Result<KpiGraph> {
    if verbose {
        eprintln!("{} {}", "Loading graph from:".cyan(), path.display());
    }

    let export = GraphExport::from_file(path).with_context(|| format!("reading {}", path.display()))?;
    let graph = KpiGraph::from_export(export).with_context(|| format!("importing {}", path.display()))?;
    Ok(graph)
}

fn write_report(report: &QualityReport, path: &Path, markdown: Option<&Path>, verbose: bool) -> Result<()> {
    report
        .save_to_file(path)
        .with_context(|| format!("writing {}", path.display()))?;
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), path.display());
    }

    if let Some(md_path) = markdown {
        std::fs::write(md_path, generate_markdown_report(report))
            .with_context(|| format!("writing {}", md_path.display()))?;
        if verbose {
            eprintln!("{} {}", "Markdown report saved to:".green(), md_path.display());
        }
    }

    Ok(())
}

/// Stats command - print graph statistics
fn stats_command(graph_path: &Path) -> Result<()> {
    let graph = load_graph(graph_path, false)?;
    let stats = graph.statistics();

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "KPI Graph Statistics".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("  Nodes:     {}", stats.total_nodes);
    println!("  Edges:     {}", stats.total_edges);
    println!("  Metrics:   {}", stats.distinct_metrics);
    println!("  Entities:  {}", stats.distinct_entities);
    match stats.year_range {
        Some((first, last)) => println!("  Years:     {}-{}", first, last),
        None => println!("  Years:     -"),
    }
    if graph.conflicts().is_empty() {
        println!("  Conflicts: {}", "0".green());
    } else {
        println!("  Conflicts: {}", graph.conflicts().len().to_string().yellow());
    }
    println!();

    if stats.total_nodes == 0 {
        return Ok(());
    }

    println!("{}", "Nodes per metric:".bold());
    for metric in graph.metrics() {
        let count = graph.nodes().filter(|node| node.metric_name() == metric).count();
        println!("  {:<32} {}", metric, count);
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());

    Ok(())
}

/// Series command - print the nodes of one (metric, entity) series
fn series_command(config: &Config, graph_path: &Path, metric: &str, entity: &str) -> Result<()> {
    let graph = load_graph(graph_path, false)?;
    let extractor = KpiExtractor::new(config);
    let entity_key = extractor.entities().normalize(entity);

    let series = graph.series(metric, &entity_key);
    if series.is_empty() {
        return Err(anyhow::anyhow!(
            "No nodes for metric '{}' and entity '{}' (key '{}')",
            metric,
            entity,
            entity_key
        ));
    }

    println!("\n{} {} / {}", "Series".bold().bright_blue(), metric.green(), entity_key.green());
    println!();

    for node in series {
        let value = match &node.observation.parsed_value {
            Some(parsed) => parsed.to_string(),
            None => "missing".yellow().to_string(),
        };
        println!(
            "  {}  {:<24} {:<16} {}",
            node.year(),
            value,
            node.raw_value(),
            node.observation.evidence.location().to_string().dimmed()
        );
    }

    println!();
    Ok(())
}

/// Candidates command - validate candidate records and write the results
fn candidates_command(
    config: &Config,
    tables_path: &Path,
    candidates_path: &Path,
    output: &Path,
    verbose: bool,
) -> Result<()> {
    let (tables, unreadable) = load_tables(&[tables_path.to_path_buf()], verbose)?;
    if !unreadable.is_empty() {
        eprintln!("{} {} malformed table records skipped", "⚠".yellow(), unreadable.len());
    }

    let records =
        read_candidates(candidates_path).with_context(|| format!("reading {}", candidates_path.display()))?;

    let extractor = KpiExtractor::new(config);
    let mut validation = CandidateValidator::new(&tables, &extractor).validate_all(records);
    for result in &mut validation.results {
        for diagnostic in &mut result.diagnostics {
            diagnostic.severity = config.severity.get_severity(diagnostic.code, diagnostic.severity);
        }
    }

    validation
        .save_to_file(output)
        .with_context(|| format!("writing {}", output.display()))?;
    if verbose {
        eprintln!("{} {}", "Validation saved to:".green(), output.display());
    }

    print_candidate_summary(&validation);
    Ok(())
}

fn print_candidate_summary(validation: &CandidateValidation) {
    let summary = &validation.summary;

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Candidate Validation".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("  Candidates:       {}", summary.total);
    println!("  Valid:            {}", summary.valid.to_string().green());
    if summary.invalid > 0 {
        println!("  Invalid:          {}", summary.invalid.to_string().red());
    } else {
        println!("  Invalid:          {}", summary.invalid);
    }
    println!("  Auto-corrected:   {}", summary.auto_corrected);
    println!("  Label mismatches: {}", summary.label_mismatches);
    println!("  Unknown tables:   {}", summary.tables_not_found);
    match summary.accuracy {
        Some(accuracy) => println!("  Accuracy:         {:.1}%", accuracy * 100.0),
        None => println!("  Accuracy:         -"),
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

/// InitConfig command - write the default configuration
fn init_config_command(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG));
    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "{} already exists; use --force to overwrite",
            path.display()
        ));
    }

    Config::default()
        .save_to_file(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("{} {}", "Wrote default configuration to".green(), path.display());

    Ok(())
}

/// Print report summary to stdout
fn print_report_summary(report: &QualityReport) {
    let summary = &report.summary;

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "KPI Graph Quality Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!();

    println!("{}", "Summary:".bold());
    println!("  Tables ingested:    {}", summary.tables_ingested);
    println!("  Invalid tables:     {}", summary.invalid_tables);
    println!("  Unresolved columns: {}", summary.unresolved_columns);
    println!("  Nodes examined:     {}", summary.nodes_examined);
    println!("  Valid:              {}", summary.valid.to_string().green());
    if summary.invalid > 0 {
        println!("  Invalid:            {}", summary.invalid.to_string().red().bold());
        for (rule, count) in &summary.invalid_by_rule {
            println!("    {:<16} {}", rule, count);
        }
    } else {
        println!("  Invalid:            {}", summary.invalid.to_string().green());
    }
    println!("  Missing values:     {}", summary.missing_values);
    println!("  No rule applicable: {}", summary.no_rule_applicable);
    println!("  Conflicts:          {}", summary.conflicts);
    match summary.consistency_rate {
        Some(rate) => println!("  Consistency rate:   {:.2}% ({:?})", rate * 100.0, summary.rate_basis),
        None => println!("  Consistency rate:   -"),
    }
    println!();

    if summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", summary.errors).green());
    }

    if summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", summary.warnings).green());
    }

    println!("  Info:     {}", summary.info);
    println!();

    if report.diagnostics.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        println!("{}", "Diagnostics:".bold());
        for diag in report.diagnostics.iter().filter(|d| d.severity > Severity::Info) {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            println!("  [{}] {}: {}", severity_str, diag.code, diag.message);

            if let Some(loc) = &diag.location {
                println!("    at {}", loc);
            }

            if let Some(exp) = &diag.expected {
                println!("    Expected: {}", exp);
            }
            if let Some(act) = &diag.actual {
                println!("    Actual:   {}", act);
            }
        }

        if summary.info > 0 {
            println!("  ({} info diagnostics in the report file)", summary.info);
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

/// Generate markdown report
fn generate_markdown_report(report: &QualityReport) -> String {
    let summary = &report.summary;
    let mut md = String::new();

    md.push_str("# KPI Graph Quality Report\n\n");
    md.push_str(&format!("**Version:** {}\n\n", report.version));
    md.push_str(&format!("**Timestamp:** {}\n\n", report.timestamp));

    md.push_str("## Summary\n\n");
    md.push_str("| Measure | Count |\n|---|---|\n");
    md.push_str(&format!("| Tables ingested | {} |\n", summary.tables_ingested));
    md.push_str(&format!("| Invalid tables | {} |\n", summary.invalid_tables));
    md.push_str(&format!("| Unresolved columns | {} |\n", summary.unresolved_columns));
    md.push_str(&format!("| Nodes examined | {} |\n", summary.nodes_examined));
    md.push_str(&format!("| Valid | {} |\n", summary.valid));
    md.push_str(&format!("| Invalid | {} |\n", summary.invalid));
    md.push_str(&format!("| Missing values | {} |\n", summary.missing_values));
    md.push_str(&format!("| No rule applicable | {} |\n", summary.no_rule_applicable));
    md.push_str(&format!("| Conflicts | {} |\n", summary.conflicts));
    md.push('\n');

    match summary.consistency_rate {
        Some(rate) => md.push_str(&format!(
            "**Consistency rate:** {:.2}% ({:?})\n\n",
            rate * 100.0,
            summary.rate_basis
        )),
        None => md.push_str("**Consistency rate:** n/a\n\n"),
    }

    if !summary.invalid_by_rule.is_empty() {
        md.push_str("### Invalid nodes by rule\n\n");
        for (rule, count) in &summary.invalid_by_rule {
            md.push_str(&format!("- {}: {}\n", rule, count));
        }
        md.push('\n');
    }

    md.push_str(&format!(
        "- Errors: {}\n- Warnings: {}\n- Info: {}\n\n",
        summary.errors, summary.warnings, summary.info
    ));

    if report.diagnostics.is_empty() {
        md.push_str("✅ **No issues found!**\n");
    } else {
        md.push_str("## Diagnostics\n\n");

        for diag in &report.diagnostics {
            let severity_emoji = match diag.severity {
                Severity::Error => "❌",
                Severity::Warn => "⚠️",
                Severity::Info => "ℹ️",
            };

            md.push_str(&format!("### {} {} - {}\n\n", severity_emoji, diag.severity, diag.code));
            md.push_str(&format!("{}\n\n", diag.message));

            if let Some(loc) = &diag.location {
                md.push_str(&format!("**Location:** {}\n\n", loc));
            }
            if let Some(node) = &diag.node_id {
                md.push_str(&format!("**Node:** `{}`\n\n", node));
            }
            if let Some(exp) = &diag.expected {
                md.push_str(&format!("**Expected:** `{}`\n\n", exp));
            }
            if let Some(act) = &diag.actual {
                md.push_str(&format!("**Actual:** `{}`\n\n", act));
            }
        }
    }

    md
}
