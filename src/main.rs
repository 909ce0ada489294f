mod catalog;
mod ingest;
mod matching;
mod models;
mod ranker;
mod reconcile;
mod scoring;
mod trend;

use anyhow::{bail, Context, Result};
use catalog::{CatalogStore, CsvAuditLog, JsonCatalog, MemoryAuditLog};
use chrono::{Datelike, Utc};
use clap::{Arg, ArgAction, Command};
use models::{ApplicantInput, Config, EligibilityResult, RecommendationMeta};
use reconcile::{ReconcileOptions, Reconciler};
use std::fs;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = Command::new("edumatch")
        .version("1.0")
        .about("Reconciles accreditation datasets and ranks admission chances")
        .subcommand_required(true)
        .subcommand(
            Command::new("reconcile")
                .about("Reconcile an external accreditation dataset into the catalog")
                .arg(
                    Arg::new("catalog")
                        .short('c')
                        .long("catalog")
                        .value_name("FILE")
                        .help("Catalog JSON file")
                        .default_value("catalog.json"),
                )
                .arg(
                    Arg::new("dataset")
                        .short('d')
                        .long("dataset")
                        .value_name("FILE")
                        .help("Accreditation dataset CSV file"),
                )
                .arg(
                    Arg::new("url")
                        .short('u')
                        .long("url")
                        .value_name("URL")
                        .help("Fetch the accreditation dataset over HTTP"),
                )
                .arg(
                    Arg::new("actor")
                        .long("actor")
                        .value_name("ID")
                        .help("Actor recorded in the audit log")
                        .default_value("cli"),
                )
                .arg(
                    Arg::new("audit")
                        .long("audit")
                        .value_name("FILE")
                        .help("Write the audit log as CSV to this file"),
                )
                .arg(
                    Arg::new("propagate")
                        .long("propagate")
                        .help("Also propagate institution-level accreditation to programs")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("recommend")
                .about("Rank programs for the applicant described in the config file")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Configuration file path")
                        .default_value("config.toml"),
                )
                .arg(
                    Arg::new("catalog")
                        .long("catalog")
                        .value_name("FILE")
                        .help("Catalog JSON file (overrides the config value)"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("reconcile", sub)) => run_reconcile(sub).await,
        Some(("recommend", sub)) => run_recommend(sub),
        _ => unreachable!("subcommand is required"),
    }
}

async fn run_reconcile(matches: &clap::ArgMatches) -> Result<()> {
    let catalog_file = matches.get_one::<String>("catalog").unwrap();
    let actor = matches.get_one::<String>("actor").unwrap();

    let dataset = match (
        matches.get_one::<String>("dataset"),
        matches.get_one::<String>("url"),
    ) {
        (Some(path), None) => {
            println!("📄 Reading accreditation dataset from: {}", path);
            ingest::read_csv_file(path)?
        }
        (None, Some(url)) => {
            println!("🌐 Fetching accreditation dataset from: {}", url);
            let client = reqwest::Client::new();
            ingest::fetch_csv_url(&client, url).await?
        }
        _ => bail!("exactly one of --dataset or --url is required"),
    };
    let records = dataset.records;
    println!("✅ Found {} records in dataset", records.len());
    if !dataset.skipped.is_empty() {
        println!("⚠️  Skipped {} malformed rows:", dataset.skipped.len());
        for line in dataset.skipped.iter().take(10) {
            println!("   - {}", line);
        }
    }

    println!("📋 Loading catalog from: {}", catalog_file);
    let mut catalog = JsonCatalog::load(catalog_file)
        .with_context(|| format!("failed to load catalog {}", catalog_file))?;

    let options = ReconcileOptions {
        actor_id: actor.clone(),
        now: Utc::now(),
    };

    let mut audit_file = match matches.get_one::<String>("audit") {
        Some(path) => {
            println!("🧾 Audit log: {}", path);
            Some(CsvAuditLog::create(path)?)
        }
        None => None,
    };
    let mut memory_audit = MemoryAuditLog::default();

    let summary = {
        let sink: &mut dyn catalog::AuditSink = match audit_file.as_mut() {
            Some(csv) => csv,
            None => &mut memory_audit,
        };
        let mut reconciler = Reconciler::new(&mut catalog, sink, options.clone());
        reconciler.run(&records)?
    };

    println!("\n📊 {}", summary.message());
    if !summary.unmatched.is_empty() {
        println!("\n❓ Unmatched records: {}", summary.unmatched.len());
        for item in summary.unmatched.iter().take(20) {
            println!("   - {}: {} ({})", item.institution, item.program, item.reason);
        }
        if summary.unmatched.len() > 20 {
            println!("   ... and {} more", summary.unmatched.len() - 20);
        }
    }
    if !summary.errors.is_empty() {
        println!("\n❌ Errors: {}", summary.errors.len());
        for error in summary.errors.iter().take(10) {
            println!("   - {}", error);
        }
    }

    if matches.get_flag("propagate") {
        println!("\n🏛️  Propagating institution-level accreditation...");
        let sink: &mut dyn catalog::AuditSink = match audit_file.as_mut() {
            Some(csv) => csv,
            None => &mut memory_audit,
        };
        let propagation =
            reconcile::propagate_institution_accreditation(&mut catalog, sink, &options);
        println!(
            "   ✅ Updated {} programs across {} institutions",
            propagation.programs_updated, propagation.institutions
        );
        for error in propagation.errors.iter().take(10) {
            println!("   ❌ {}", error);
        }
    }

    if let Some(csv) = audit_file.as_mut() {
        csv.flush()?;
    }

    catalog.save(catalog_file)?;
    println!("\n💾 Catalog saved to: {}", catalog_file);
    Ok(())
}

fn run_recommend(matches: &clap::ArgMatches) -> Result<()> {
    let config_file = matches.get_one::<String>("config").unwrap();

    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        println!(
            "⚠️  Please edit {} and set your UTME score and O-level grades, then run again.",
            config_file
        );
        return Ok(());
    };

    if config.utme_score <= 0.0 {
        println!("❌ Error: utme_score is not set in the configuration file");
        println!("   Please edit {} and set your UTME score (0-400)", config_file);
        return Ok(());
    }

    let catalog_file = matches
        .get_one::<String>("catalog")
        .cloned()
        .or_else(|| config.catalog_file.clone())
        .unwrap_or_else(|| "catalog.json".to_string());
    let output_dir = config.output_directory.as_deref().unwrap_or("output");
    let limit = config.result_limit.unwrap_or(10);

    println!("📋 Loading catalog from: {}", catalog_file);
    let catalog = JsonCatalog::load(&catalog_file)
        .with_context(|| format!("failed to load catalog {}", catalog_file))?;
    let institutions = catalog.institutions();

    let input = ApplicantInput::from_config(&config);
    println!("🎯 UTME score: {}", input.utme_score);
    println!("📚 O-level subjects: {}", input.olevel_grades.len());
    if let Some(post_utme) = input.post_utme_score {
        println!("📝 Post-UTME score: {}", post_utme);
    }

    let current_year = Utc::now().year();
    let (results, meta) = ranker::recommend(&institutions, &input, limit, current_year);

    fs::create_dir_all(output_dir)?;
    generate_recommendations_csv(&results, output_dir)?;
    print_recommendation_summary(&results, &meta);

    println!("\n📂 Detailed report: {}/recommendations.csv", output_dir);
    Ok(())
}

fn generate_recommendations_csv(results: &[EligibilityResult], output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join("recommendations.csv");
    let mut writer = csv::Writer::from_path(csv_path)?;

    writer.write_record([
        "Rank",
        "Program",
        "Institution",
        "Composite_Score",
        "Probability",
        "Confidence_Low",
        "Confidence_High",
        "Category",
        "Priority_Score",
        "Warning",
        "Rationale",
    ])?;

    for (i, result) in results.iter().enumerate() {
        let probability = result
            .probability
            .map(|p| format!("{:.2}", p))
            .unwrap_or_default();
        let (low, high) = result
            .confidence_interval
            .map(|(lo, hi)| (format!("{:.2}", lo), format!("{:.2}", hi)))
            .unwrap_or_default();

        writer.write_record([
            (i + 1).to_string().as_str(),
            result.program_name.as_str(),
            result.institution_name.as_str(),
            format!("{:.2}", result.composite_score).as_str(),
            probability.as_str(),
            low.as_str(),
            high.as_str(),
            format!("{:?}", result.category).to_lowercase().as_str(),
            result.priority_score.to_string().as_str(),
            result.accreditation_warning.as_deref().unwrap_or(""),
            result.rationale.as_str(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn print_recommendation_summary(results: &[EligibilityResult], meta: &RecommendationMeta) {
    println!("\n📊 SUMMARY");
    println!("==========\n");
    println!("🧮 Composite score: {:.2}", meta.composite_score);
    println!(
        "🎓 Recommended {} of {} candidate programs:",
        meta.recommended, meta.total_candidates
    );

    for (i, result) in results.iter().enumerate() {
        let probability = result
            .probability
            .map(|p| format!("{:.0}%", p * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "   {}. {} at {} - {} ({:?})",
            i + 1,
            result.program_name,
            result.institution_name,
            probability,
            result.category
        );
        if let Some(warning) = &result.accreditation_warning {
            println!("      ⚠️  {}", warning);
        }
    }

    if results.is_empty() {
        println!("   ❓ No programs cleared the probability floor; consider broadening inputs");
    }
}
